//! Call adapter layer
//!
//! [`ClassBinding::generate`] compiles a [`ClassDescriptor`] into adapters:
//! for each method a parameter list to lower and a [`ResultLowering`] to
//! apply to the raw result. The "returns receiver" attribute is resolved
//! here, once, for every class alike.
//!
//! Lowering (host to engine):
//!
//! | Parameter | Accepted argument | Passed as |
//! |-----------|-------------------|-----------|
//! | `Int` | integral number in i32 range | `I32` |
//! | `Long` | integral number in i64 range | `I64` |
//! | `Double` | any number | `F64` |
//! | `Bool` | boolean or integer | `I32` 0/1 |
//! | `Object(c)` | live wrapper of class `c`, the null wrapper, or a raw pointer | `I32` |
//! | `Str` / `Array` | host value, marshalled; or a raw pointer | `I32` |

use crate::class::{CallSignature, ClassDescriptor, ClassTag, ParamKind, ReturnKind};
use crate::engine::EngineError;
use crate::error::{BindError, BindResult};
use crate::marshal::MarshalError;
use crate::value::{Arg, ForeignPtr, NativeArray, RawValue, Value};
use crate::wrapper::Wrapper;
use std::collections::HashMap;
use std::rc::Rc;

/// How a raw result becomes a host value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultLowering {
    Void,
    /// Yield the receiver wrapper itself
    Receiver,
    /// Wrap the returned pointer through the identity cache
    Wrap(ClassTag),
    /// Non-zero integer is true
    Bool,
    Int,
    Long,
    Double,
    /// Read the returned NUL-terminated string
    Str,
}

#[derive(Debug, Clone)]
pub struct MethodAdapter {
    pub name: &'static str,
    pub symbol: &'static str,
    pub params: &'static [ParamKind],
    pub lowering: ResultLowering,
    pub is_static: bool,
    /// Some parameter needs scratch memory
    pub marshals: bool,
}

#[derive(Debug, Clone)]
pub struct ConstructorAdapter {
    pub symbol: &'static str,
    pub params: &'static [ParamKind],
    pub marshals: bool,
}

/// A class descriptor compiled into call adapters
#[derive(Debug)]
pub struct ClassBinding {
    descriptor: &'static ClassDescriptor,
    methods: HashMap<&'static str, MethodAdapter>,
    constructors: Vec<ConstructorAdapter>,
}

impl ClassBinding {
    /// Validate a descriptor and generate its adapters
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` when method names repeat, constructors share an
    /// arity, "returns receiver" is declared on a static method or on a
    /// method whose declared return is neither void nor the class itself,
    /// or a call signature uses marshalled parameters or a string result.
    pub fn generate(descriptor: &'static ClassDescriptor) -> BindResult<Self> {
        let class = descriptor.tag;
        let invalid = |reason: String| BindError::InvalidDescriptor { class, reason };

        let mut methods = HashMap::with_capacity(descriptor.methods.len());
        for method in descriptor.methods {
            if method.returns_receiver {
                if method.is_static {
                    return Err(invalid(format!(
                        "static method '{}' cannot return its receiver",
                        method.name
                    )));
                }
                if !matches!(method.ret, ReturnKind::Void)
                    && method.ret != ReturnKind::Object(class)
                {
                    return Err(invalid(format!(
                        "method '{}' returns its receiver but declares {:?}",
                        method.name, method.ret
                    )));
                }
            }

            let lowering = if method.returns_receiver {
                ResultLowering::Receiver
            } else {
                lowering_for(method.ret)
            };

            let adapter = MethodAdapter {
                name: method.name,
                symbol: method.symbol,
                params: method.params,
                lowering,
                is_static: method.is_static,
                marshals: method.params.iter().any(ParamKind::is_marshalled),
            };
            if methods.insert(method.name, adapter).is_some() {
                return Err(invalid(format!("duplicate method '{}'", method.name)));
            }
        }

        let mut constructors: Vec<ConstructorAdapter> = Vec::new();
        for ctor in descriptor.constructors {
            if constructors
                .iter()
                .any(|c| c.params.len() == ctor.params.len())
            {
                return Err(invalid(format!(
                    "two constructors take {} arguments",
                    ctor.params.len()
                )));
            }
            constructors.push(ConstructorAdapter {
                symbol: ctor.symbol,
                params: ctor.params,
                marshals: ctor.params.iter().any(ParamKind::is_marshalled),
            });
        }

        if let Some(signature) = &descriptor.callable {
            if signature.params.iter().any(ParamKind::is_marshalled) {
                return Err(invalid(
                    "callable parameters cannot be marshalled".to_string(),
                ));
            }
            if signature.ret == ReturnKind::Str {
                return Err(invalid("callable cannot return a string".to_string()));
            }
        }

        Ok(Self {
            descriptor,
            methods,
            constructors,
        })
    }

    pub fn descriptor(&self) -> &'static ClassDescriptor {
        self.descriptor
    }

    pub fn tag(&self) -> ClassTag {
        self.descriptor.tag
    }

    pub fn method(&self, name: &str) -> Option<&MethodAdapter> {
        self.methods.get(name)
    }

    pub fn constructor(&self, arity: usize) -> Option<&ConstructorAdapter> {
        self.constructors.iter().find(|c| c.params.len() == arity)
    }

    pub fn is_constructible(&self) -> bool {
        !self.constructors.is_empty()
    }

    pub fn finalizer(&self) -> Option<&'static str> {
        self.descriptor.finalizer
    }

    pub fn release_cache(&self) -> Option<&'static str> {
        self.descriptor.release_cache
    }

    pub fn callable(&self) -> Option<CallSignature> {
        self.descriptor.callable
    }
}

fn lowering_for(ret: ReturnKind) -> ResultLowering {
    match ret {
        ReturnKind::Void => ResultLowering::Void,
        ReturnKind::Int => ResultLowering::Int,
        ReturnKind::Long => ResultLowering::Long,
        ReturnKind::Double => ResultLowering::Double,
        ReturnKind::Bool => ResultLowering::Bool,
        ReturnKind::Str => ResultLowering::Str,
        ReturnKind::Object(class) => ResultLowering::Wrap(class),
    }
}

/// Generated bindings by class
#[derive(Debug, Default)]
pub struct ClassRegistry {
    bindings: HashMap<ClassTag, Rc<ClassBinding>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and register a binding, replacing any previous one for the tag
    pub fn register(&mut self, descriptor: &'static ClassDescriptor) -> BindResult<Rc<ClassBinding>> {
        let binding = Rc::new(ClassBinding::generate(descriptor)?);
        self.bindings.insert(descriptor.tag, binding.clone());
        Ok(binding)
    }

    pub fn get(&self, class: ClassTag) -> Option<Rc<ClassBinding>> {
        self.bindings.get(&class).cloned()
    }

    pub fn contains(&self, class: ClassTag) -> bool {
        self.bindings.contains_key(&class)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Scratch memory for marshalled arguments
pub trait ScratchSpace {
    fn write_str(&mut self, text: &str) -> Result<ForeignPtr, MarshalError>;
    fn write_array(&mut self, array: &NativeArray) -> Result<ForeignPtr, MarshalError>;
}

/// Where lifted results find wrappers and strings
pub trait ObjectSpace {
    fn wrap(&self, ptr: ForeignPtr, class: ClassTag) -> Wrapper;
    fn read_str(&self, ptr: ForeignPtr) -> Result<String, EngineError>;
}

/// Lower one host argument for a parameter of `kind`
pub fn lower_argument(
    kind: &ParamKind,
    arg: &Arg,
    scratch: &mut dyn ScratchSpace,
) -> BindResult<RawValue> {
    match (kind, arg) {
        (ParamKind::Int, Arg::Raw(raw)) => {
            let value = integral(raw, i32::MIN as f64, INT_END, "int")?;
            Ok(RawValue::I32(value as i32))
        }
        (ParamKind::Long, Arg::Raw(raw)) => match raw {
            RawValue::I32(v) => Ok(RawValue::I64(*v as i64)),
            RawValue::I64(v) => Ok(RawValue::I64(*v)),
            _ => {
                let value = integral(raw, i64::MIN as f64, LONG_END, "long")?;
                Ok(RawValue::I64(value as i64))
            }
        },
        (ParamKind::Double, Arg::Raw(raw)) => match raw {
            RawValue::F64(v) => Ok(RawValue::F64(*v)),
            RawValue::I32(v) => Ok(RawValue::F64(*v as f64)),
            RawValue::I64(v) => Ok(RawValue::F64(*v as f64)),
            RawValue::Void => Err(BindError::type_mismatch("double", "void")),
        },
        (ParamKind::Bool, Arg::Raw(raw)) => match raw {
            RawValue::I32(v) => Ok(RawValue::I32((*v != 0) as i32)),
            RawValue::I64(v) => Ok(RawValue::I32((*v != 0) as i32)),
            other => Err(BindError::type_mismatch("bool", other.type_name())),
        },
        (ParamKind::Object(class), Arg::Handle(wrapper)) => {
            if wrapper.is_destroyed() {
                return Err(BindError::UseAfterDestroy {
                    class: wrapper.class(),
                    ptr: wrapper.pointer(),
                });
            }
            if !wrapper.is_null() && wrapper.class() != *class {
                return Err(BindError::type_mismatch(class.name(), wrapper.class().name()));
            }
            Ok(RawValue::from(wrapper.pointer()))
        }
        (ParamKind::Str, Arg::Str(text)) => Ok(RawValue::from(scratch.write_str(text)?)),
        (ParamKind::Array(expected), Arg::Array(array)) => {
            if array.kind() != *expected {
                return Err(BindError::type_mismatch(expected.name(), array.kind().name()));
            }
            Ok(RawValue::from(scratch.write_array(array)?))
        }
        (ParamKind::Object(_) | ParamKind::Str | ParamKind::Array(_), Arg::Raw(RawValue::I32(p))) => {
            Ok(RawValue::I32(*p))
        }
        (kind, arg) => Err(BindError::type_mismatch(kind.name(), arg.type_name())),
    }
}

/// Exclusive upper bounds of the integer parameter kinds, 2^31 and 2^63
const INT_END: f64 = 2_147_483_648.0;
const LONG_END: f64 = 9_223_372_036_854_775_808.0;

/// Check that `raw` holds a whole number in `[min, end)`
fn integral(raw: &RawValue, min: f64, end: f64, target: &'static str) -> BindResult<f64> {
    let value = match raw {
        RawValue::I32(v) => *v as f64,
        RawValue::I64(v) => *v as f64,
        RawValue::F64(v) => *v,
        RawValue::Void => return Err(BindError::type_mismatch(target, "void")),
    };
    if value >= min && value < end && value.fract() == 0.0 {
        Ok(value)
    } else {
        Err(BindError::NumberOutOfRange { value, target })
    }
}

/// Turn a raw result into a host value
pub fn lift_result(
    lowering: &ResultLowering,
    raw: RawValue,
    receiver: Option<&Wrapper>,
    space: &dyn ObjectSpace,
) -> BindResult<Value> {
    match lowering {
        ResultLowering::Void => Ok(Value::Void),
        ResultLowering::Receiver => receiver
            .cloned()
            .map(Value::Object)
            .ok_or_else(|| BindError::type_mismatch("receiver", "static call")),
        ResultLowering::Wrap(class) => {
            let ptr = raw
                .as_ptr()
                .ok_or_else(|| BindError::type_mismatch("pointer", raw.type_name()))?;
            Ok(Value::Object(space.wrap(ptr, *class)))
        }
        ResultLowering::Bool => raw
            .as_i64()
            .map(|v| Value::Bool(v != 0))
            .ok_or_else(|| BindError::type_mismatch("bool", raw.type_name())),
        ResultLowering::Int | ResultLowering::Long => raw
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| BindError::type_mismatch("integer", raw.type_name())),
        ResultLowering::Double => raw
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| BindError::type_mismatch("double", raw.type_name())),
        ResultLowering::Str => {
            let ptr = raw
                .as_ptr()
                .ok_or_else(|| BindError::type_mismatch("string pointer", raw.type_name()))?;
            Ok(Value::Str(space.read_str(ptr)?))
        }
    }
}

/// Lift an engine-supplied callback parameter
pub fn lift_param(kind: &ParamKind, raw: RawValue, space: &dyn ObjectSpace) -> BindResult<Value> {
    match kind {
        ParamKind::Int | ParamKind::Long => raw
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| BindError::type_mismatch(kind.name(), raw.type_name())),
        ParamKind::Double => raw
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| BindError::type_mismatch("double", raw.type_name())),
        ParamKind::Bool => raw
            .as_i64()
            .map(|v| Value::Bool(v != 0))
            .ok_or_else(|| BindError::type_mismatch("bool", raw.type_name())),
        ParamKind::Object(class) => raw
            .as_ptr()
            .map(|ptr| Value::Object(space.wrap(ptr, *class)))
            .ok_or_else(|| BindError::type_mismatch(class.name(), raw.type_name())),
        ParamKind::Str | ParamKind::Array(_) => {
            Err(BindError::type_mismatch("scalar or object", kind.name()))
        }
    }
}

/// Lower a host callback's result for the engine
pub fn lower_callback_result(ret: &ReturnKind, value: &Value) -> BindResult<RawValue> {
    match (ret, value) {
        (ReturnKind::Void, _) => Ok(RawValue::Void),
        (ReturnKind::Double, v) => v
            .as_number()
            .map(RawValue::F64)
            .ok_or_else(|| BindError::type_mismatch("number", v.type_name())),
        (ReturnKind::Int, v) => {
            let raw = RawValue::F64(
                v.as_number()
                    .ok_or_else(|| BindError::type_mismatch("int", v.type_name()))?,
            );
            Ok(RawValue::I32(integral(&raw, i32::MIN as f64, INT_END, "int")? as i32))
        }
        (ReturnKind::Long, Value::Int(i)) => Ok(RawValue::I64(*i)),
        (ReturnKind::Bool, Value::Bool(b)) => Ok(RawValue::from(*b)),
        (ReturnKind::Object(class), Value::Object(w)) if w.is_null() || w.class() == *class => {
            Ok(RawValue::from(w.pointer()))
        }
        (ret, v) => Err(BindError::type_mismatch(format!("{:?}", ret), v.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ConstructorDescriptor, MethodDescriptor};

    const SELF_TAG: ClassTag = ClassTag::new("Chain");
    const OTHER: ClassTag = ClassTag::new("Other");

    struct NoScratch;

    impl ScratchSpace for NoScratch {
        fn write_str(&mut self, _text: &str) -> Result<ForeignPtr, MarshalError> {
            Ok(ForeignPtr(0x100))
        }
        fn write_array(&mut self, _array: &NativeArray) -> Result<ForeignPtr, MarshalError> {
            Ok(ForeignPtr(0x200))
        }
    }

    static CHAIN_CLASS: ClassDescriptor = ClassDescriptor {
        tag: SELF_TAG,
        constructors: &[ConstructorDescriptor {
            symbol: "Chain_new",
            params: &[],
        }],
        finalizer: Some("Chain_destroy"),
        methods: &[
            MethodDescriptor::chain("inc", "Chain_inc", &[]),
            MethodDescriptor {
                name: "me",
                symbol: "Chain_me",
                params: &[],
                ret: ReturnKind::Object(SELF_TAG),
                returns_receiver: true,
                is_static: false,
            },
            MethodDescriptor::method("label", "Chain_label", &[ParamKind::Str], ReturnKind::Str),
            MethodDescriptor::method("other", "Chain_other", &[], ReturnKind::Object(OTHER)),
        ],
        callable: None,
        release_cache: None,
    };

    static STATIC_RECEIVER: ClassDescriptor = ClassDescriptor {
        methods: &[MethodDescriptor {
            name: "make",
            symbol: "Bad_make",
            params: &[],
            ret: ReturnKind::Void,
            returns_receiver: true,
            is_static: true,
        }],
        ..ClassDescriptor::opaque(ClassTag::new("Bad"))
    };

    static FOREIGN_RECEIVER: ClassDescriptor = ClassDescriptor {
        methods: &[MethodDescriptor {
            name: "set",
            symbol: "Bad_set",
            params: &[],
            ret: ReturnKind::Object(OTHER),
            returns_receiver: true,
            is_static: false,
        }],
        ..ClassDescriptor::opaque(ClassTag::new("Bad"))
    };

    static DUPLICATE: ClassDescriptor = ClassDescriptor {
        methods: &[
            MethodDescriptor::method("x", "Dup_x1", &[], ReturnKind::Void),
            MethodDescriptor::method("x", "Dup_x2", &[], ReturnKind::Void),
        ],
        ..ClassDescriptor::opaque(ClassTag::new("Dup"))
    };

    #[test]
    fn test_receiver_lowering_is_uniform() {
        let binding = ClassBinding::generate(&CHAIN_CLASS).unwrap();
        assert_eq!(binding.method("inc").unwrap().lowering, ResultLowering::Receiver);
        assert_eq!(binding.method("me").unwrap().lowering, ResultLowering::Receiver);
        assert_eq!(
            binding.method("other").unwrap().lowering,
            ResultLowering::Wrap(OTHER)
        );
        assert!(binding.method("label").unwrap().marshals);
        assert!(!binding.method("inc").unwrap().marshals);
    }

    #[test]
    fn test_invalid_receiver_declarations() {
        assert!(matches!(
            ClassBinding::generate(&STATIC_RECEIVER),
            Err(BindError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            ClassBinding::generate(&FOREIGN_RECEIVER),
            Err(BindError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            ClassBinding::generate(&DUPLICATE),
            Err(BindError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_int_lowering_checks_range() {
        let mut scratch = NoScratch;
        assert_eq!(
            lower_argument(&ParamKind::Int, &Arg::from(42.0), &mut scratch).unwrap(),
            RawValue::I32(42)
        );
        assert!(matches!(
            lower_argument(&ParamKind::Int, &Arg::from(1.5), &mut scratch),
            Err(BindError::NumberOutOfRange { .. })
        ));
        assert!(matches!(
            lower_argument(&ParamKind::Int, &Arg::from(1i64 << 40), &mut scratch),
            Err(BindError::NumberOutOfRange { .. })
        ));
    }

    #[test]
    fn test_integer_upper_bounds_are_exclusive() {
        let mut scratch = NoScratch;
        assert_eq!(
            lower_argument(&ParamKind::Int, &Arg::from(2_147_483_647.0), &mut scratch).unwrap(),
            RawValue::I32(i32::MAX)
        );
        assert!(matches!(
            lower_argument(&ParamKind::Int, &Arg::from(2_147_483_648.0), &mut scratch),
            Err(BindError::NumberOutOfRange { target: "int", .. })
        ));
        assert!(matches!(
            lower_argument(&ParamKind::Long, &Arg::from(9_223_372_036_854_775_808.0), &mut scratch),
            Err(BindError::NumberOutOfRange { target: "long", .. })
        ));
        assert_eq!(
            lower_argument(&ParamKind::Long, &Arg::from(-9_223_372_036_854_775_808.0), &mut scratch)
                .unwrap(),
            RawValue::I64(i64::MIN)
        );
    }

    #[test]
    fn test_bool_lowering_coerces_integers() {
        let mut scratch = NoScratch;
        assert_eq!(
            lower_argument(&ParamKind::Bool, &Arg::from(7), &mut scratch).unwrap(),
            RawValue::I32(1)
        );
        assert!(lower_argument(&ParamKind::Bool, &Arg::from(0.5), &mut scratch).is_err());
    }

    #[test]
    fn test_handles_are_class_checked() {
        let mut scratch = NoScratch;
        let other = Wrapper::new(ForeignPtr(64), OTHER);
        let null = Wrapper::new(ForeignPtr::NULL, ClassTag::WRAPPER_OBJECT);
        assert!(matches!(
            lower_argument(&ParamKind::Object(SELF_TAG), &Arg::from(&other), &mut scratch),
            Err(BindError::TypeMismatch { .. })
        ));
        assert_eq!(
            lower_argument(&ParamKind::Object(SELF_TAG), &Arg::from(&null), &mut scratch).unwrap(),
            RawValue::I32(0)
        );
        other.mark_destroyed();
        assert!(matches!(
            lower_argument(&ParamKind::Object(OTHER), &Arg::from(&other), &mut scratch),
            Err(BindError::UseAfterDestroy { .. })
        ));
    }

    #[test]
    fn test_marshalled_arguments_use_scratch() {
        let mut scratch = NoScratch;
        assert_eq!(
            lower_argument(&ParamKind::Str, &Arg::from("2.5"), &mut scratch).unwrap(),
            RawValue::I32(0x100)
        );
        assert_eq!(
            lower_argument(
                &ParamKind::Array(crate::value::ArrayKind::F64),
                &Arg::from(vec![1.0, 2.0]),
                &mut scratch
            )
            .unwrap(),
            RawValue::I32(0x200)
        );
        assert!(matches!(
            lower_argument(
                &ParamKind::Array(crate::value::ArrayKind::I8),
                &Arg::from(vec![1.0]),
                &mut scratch
            ),
            Err(BindError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_callback_result_lowering() {
        assert_eq!(
            lower_callback_result(&ReturnKind::Double, &Value::Int(2)).unwrap(),
            RawValue::F64(2.0)
        );
        assert!(lower_callback_result(&ReturnKind::Double, &Value::Str("x".into())).is_err());
        assert_eq!(
            lower_callback_result(&ReturnKind::Void, &Value::Number(1.0)).unwrap(),
            RawValue::Void
        );
    }
}
