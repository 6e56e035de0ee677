//! Numeric class surface
//!
//! Descriptors for the engine's arbitrary-precision float, its opaque
//! pointer type, the integrand callback and the tanh-sinh integrator, plus
//! the rounding modes passed to the engine as plain integers.

use crate::bridge::Bridge;
use crate::class::{
    CallSignature, ClassDescriptor, ClassTag, ConstructorDescriptor, MethodDescriptor, ParamKind,
    ReturnKind,
};
use crate::error::{BindError, BindResult};
use crate::value::{Arg, ArrayKind, RawValue};
use crate::wrapper::Wrapper;
use std::fmt;
use tracing::debug;

pub const VOID_PTR: ClassTag = ClassTag::new("VoidPtr");
pub const FLOAT: ClassTag = ClassTag::new("Float");
pub const INTEGRAND: ClassTag = ClassTag::new("Integrand");
pub const TANH_SINH: ClassTag = ClassTag::new("TanhSinh");

/// Rounding mode, coded as the engine's integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Rounding {
    #[default]
    Nearest = 0,
    TowardZero = 1,
    TowardInfinity = 2,
    TowardMinusInfinity = 3,
    AwayZero = 4,
    Faithful = 5,
}

impl Rounding {
    pub const ALL: [Rounding; 6] = [
        Rounding::Nearest,
        Rounding::TowardZero,
        Rounding::TowardInfinity,
        Rounding::TowardMinusInfinity,
        Rounding::AwayZero,
        Rounding::Faithful,
    ];

    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Option<Rounding> {
        Self::ALL.get(usize::try_from(raw).ok()?).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Rounding::Nearest => "nearest",
            Rounding::TowardZero => "toward_zero",
            Rounding::TowardInfinity => "toward_infinity",
            Rounding::TowardMinusInfinity => "toward_minus_infinity",
            Rounding::AwayZero => "away_zero",
            Rounding::Faithful => "faithful",
        }
    }

    pub fn from_name(name: &str) -> Option<Rounding> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }
}

impl fmt::Display for Rounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Rounding> for Arg {
    fn from(rounding: Rounding) -> Self {
        Arg::Raw(RawValue::I32(rounding.as_raw()))
    }
}

const FLOAT_ARG: &[ParamKind] = &[ParamKind::Object(FLOAT)];
const DOUBLE_ARG: &[ParamKind] = &[ParamKind::Double];
const INT_ARG: &[ParamKind] = &[ParamKind::Int];

const FLOAT_METHODS: &[MethodDescriptor] = &[
    // setters
    MethodDescriptor::chain("set", "Float_set_d", DOUBLE_ARG),
    MethodDescriptor::chain("set_float", "Float_set", FLOAT_ARG),
    MethodDescriptor::chain("set_string", "Float_set_str", &[ParamKind::Str, ParamKind::Int]),
    MethodDescriptor::chain("set_rounding", "Float_set_rounding", INT_ARG),
    MethodDescriptor::chain("set_precision", "Float_set_prec", INT_ARG),
    // arithmetic, in place
    MethodDescriptor::chain("add", "Float_add", FLOAT_ARG),
    MethodDescriptor::chain("sub", "Float_sub", FLOAT_ARG),
    MethodDescriptor::chain("mul", "Float_mul", FLOAT_ARG),
    MethodDescriptor::chain("div", "Float_div", FLOAT_ARG),
    MethodDescriptor::chain("add_d", "Float_add_d", DOUBLE_ARG),
    MethodDescriptor::chain("sub_d", "Float_sub_d", DOUBLE_ARG),
    MethodDescriptor::chain("mul_d", "Float_mul_d", DOUBLE_ARG),
    MethodDescriptor::chain("div_d", "Float_div_d", DOUBLE_ARG),
    MethodDescriptor::chain("sqrt", "Float_sqrt", &[]),
    MethodDescriptor::chain("rec_sqrt", "Float_rec_sqrt", &[]),
    MethodDescriptor::chain("cbrt", "Float_cbrt", &[]),
    MethodDescriptor::chain("root_ui", "Float_root_ui", INT_ARG),
    MethodDescriptor::chain("neg", "Float_neg", &[]),
    MethodDescriptor::chain("abs", "Float_abs", &[]),
    MethodDescriptor::chain("exp", "Float_exp", &[]),
    MethodDescriptor::chain("log", "Float_log", &[]),
    MethodDescriptor::chain("sin", "Float_sin", &[]),
    MethodDescriptor::chain("cos", "Float_cos", &[]),
    MethodDescriptor::chain("zeta", "Float_zeta", &[]),
    MethodDescriptor::chain("floor", "Float_floor", &[]),
    MethodDescriptor::chain("ceil", "Float_ceil", &[]),
    MethodDescriptor::chain("trunc", "Float_trunc", &[]),
    MethodDescriptor::chain("swap", "Float_swap", FLOAT_ARG),
    MethodDescriptor::chain("const_pi", "Float_const_pi", &[]),
    // queries
    MethodDescriptor::method("clone", "Float_clone", &[], ReturnKind::Object(FLOAT)),
    MethodDescriptor::method("to_number", "Float_get_d", &[], ReturnKind::Double),
    MethodDescriptor::method("to_string", "Float_to_string", &[], ReturnKind::Str),
    MethodDescriptor::method("get_precision", "Float_get_prec", &[], ReturnKind::Int),
    MethodDescriptor::method("get_rounding", "Float_get_rounding", &[], ReturnKind::Int),
    MethodDescriptor::method("is_zero", "Float_is_zero", &[], ReturnKind::Bool),
    MethodDescriptor::method("is_nan", "Float_is_nan", &[], ReturnKind::Bool),
    MethodDescriptor::method("is_infinity", "Float_is_inf", &[], ReturnKind::Bool),
    MethodDescriptor::method("is_integer", "Float_is_integer", &[], ReturnKind::Bool),
    MethodDescriptor::method("less", "Float_less", FLOAT_ARG, ReturnKind::Bool),
    MethodDescriptor::method("greater", "Float_greater", FLOAT_ARG, ReturnKind::Bool),
    MethodDescriptor::method("equal", "Float_equal", FLOAT_ARG, ReturnKind::Bool),
    MethodDescriptor::method("less_equal", "Float_less_equal", FLOAT_ARG, ReturnKind::Bool),
    MethodDescriptor::method(
        "greater_equal",
        "Float_greater_equal",
        FLOAT_ARG,
        ReturnKind::Bool,
    ),
    MethodDescriptor::method("not_equal", "Float_not_equal", FLOAT_ARG, ReturnKind::Bool),
    // statics
    MethodDescriptor::static_fn(
        "sum",
        "Float_op_sum",
        &[
            ParamKind::Object(FLOAT),
            ParamKind::Array(ArrayKind::F64),
            ParamKind::Int,
        ],
        ReturnKind::Void,
    ),
    MethodDescriptor::static_fn(
        "dot",
        "Float_op_dot",
        &[
            ParamKind::Object(FLOAT),
            ParamKind::Array(ArrayKind::F64),
            ParamKind::Array(ArrayKind::F64),
            ParamKind::Int,
        ],
        ReturnKind::Void,
    ),
    MethodDescriptor::static_fn(
        "set_default_rounding",
        "Float_set_default_rounding",
        INT_ARG,
        ReturnKind::Void,
    ),
    MethodDescriptor::static_fn("version", "Float_get_version", &[], ReturnKind::Str),
];

pub static FLOAT_CLASS: ClassDescriptor = ClassDescriptor {
    tag: FLOAT,
    constructors: &[
        ConstructorDescriptor {
            symbol: "Float_new_1",
            params: INT_ARG,
        },
        ConstructorDescriptor {
            symbol: "Float_new_2",
            params: &[ParamKind::Int, ParamKind::Double],
        },
    ],
    finalizer: Some("Float_destroy"),
    methods: FLOAT_METHODS,
    callable: None,
    release_cache: Some("Float_free_cache"),
};

pub static VOID_PTR_CLASS: ClassDescriptor = ClassDescriptor {
    finalizer: Some("VoidPtr_destroy"),
    ..ClassDescriptor::opaque(VOID_PTR)
};

pub static INTEGRAND_CLASS: ClassDescriptor = ClassDescriptor {
    finalizer: Some("Integrand_destroy"),
    callable: Some(CallSignature {
        params: FLOAT_ARG,
        ret: ReturnKind::Double,
    }),
    ..ClassDescriptor::opaque(INTEGRAND)
};

const TANH_SINH_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::method(
        "set_integrand",
        "TanhSinh_set_integrand",
        &[ParamKind::Object(INTEGRAND)],
        ReturnKind::Void,
    ),
    MethodDescriptor::method(
        "set_bounds",
        "TanhSinh_set_bounds",
        &[ParamKind::Object(FLOAT), ParamKind::Object(FLOAT)],
        ReturnKind::Void,
    ),
    MethodDescriptor::method(
        "set_lower_bound",
        "TanhSinh_set_lower_bound",
        FLOAT_ARG,
        ReturnKind::Void,
    ),
    MethodDescriptor::method(
        "set_upper_bound",
        "TanhSinh_set_upper_bound",
        FLOAT_ARG,
        ReturnKind::Void,
    ),
    MethodDescriptor::method("compile", "TanhSinh_compile", &[], ReturnKind::Void),
    MethodDescriptor::method("integrate", "TanhSinh_integrate", &[], ReturnKind::Void),
    MethodDescriptor::method(
        "get_lower_bound",
        "TanhSinh_get_lower_bound",
        &[],
        ReturnKind::Object(FLOAT),
    ),
    MethodDescriptor::method(
        "get_upper_bound",
        "TanhSinh_get_upper_bound",
        &[],
        ReturnKind::Object(FLOAT),
    ),
    MethodDescriptor::method(
        "get_integral_approx",
        "TanhSinh_get_integral_approx",
        &[],
        ReturnKind::Object(FLOAT),
    ),
    MethodDescriptor::method(
        "get_absolute_error_approx",
        "TanhSinh_get_absolute_error_approx",
        &[],
        ReturnKind::Object(FLOAT),
    ),
    MethodDescriptor::method(
        "is_convergent_error",
        "TanhSinh_is_convergent_error",
        &[],
        ReturnKind::Bool,
    ),
    MethodDescriptor::method(
        "get_relative_error_exponent",
        "TanhSinh_get_relative_error_exponent",
        &[],
        ReturnKind::Int,
    ),
    MethodDescriptor::method(
        "get_integrand_call_count",
        "TanhSinh_get_integrand_call_count",
        &[],
        ReturnKind::Int,
    ),
];

pub static TANH_SINH_CLASS: ClassDescriptor = ClassDescriptor {
    tag: TANH_SINH,
    constructors: &[
        ConstructorDescriptor {
            symbol: "TanhSinh_new_1",
            params: INT_ARG,
        },
        ConstructorDescriptor {
            symbol: "TanhSinh_new_2",
            params: &[ParamKind::Int, ParamKind::Int],
        },
    ],
    finalizer: Some("TanhSinh_destroy"),
    methods: TANH_SINH_METHODS,
    callable: None,
    release_cache: None,
};

/// Every numeric class descriptor
pub fn classes() -> [&'static ClassDescriptor; 4] {
    [&VOID_PTR_CLASS, &FLOAT_CLASS, &INTEGRAND_CLASS, &TANH_SINH_CLASS]
}

impl Bridge {
    /// Register the numeric classes and push the configured default rounding
    pub fn with_numeric_classes(self) -> BindResult<Self> {
        for descriptor in classes() {
            self.register_class(descriptor)?;
        }
        if self.engine().has_symbol("Float_set_default_rounding") {
            self.call_static(
                FLOAT,
                "set_default_rounding",
                &[Arg::from(self.default_rounding())],
            )?;
        }
        debug!(rounding = %self.default_rounding(), "numeric classes registered");
        Ok(self)
    }

    /// The configured default precision as a constructor argument
    pub fn precision_arg(&self) -> BindResult<Arg> {
        let precision = i32::try_from(self.default_precision()).map_err(|_| {
            BindError::NumberOutOfRange {
                value: self.default_precision() as f64,
                target: "int",
            }
        })?;
        Ok(Arg::from(precision))
    }

    /// A float at the configured default precision
    pub fn float(&self, value: f64) -> BindResult<Wrapper> {
        self.construct(FLOAT, &[self.precision_arg()?, Arg::from(value)])
    }

    /// Hand a host function to the engine as an integrand
    pub fn integrand<F>(&self, f: F) -> BindResult<Wrapper>
    where
        F: Fn(&Bridge, &Wrapper) -> BindResult<f64> + 'static,
    {
        self.callable(INTEGRAND, move |bridge, args| {
            let x = args
                .first()
                .and_then(|v| v.as_object())
                .ok_or_else(|| BindError::type_mismatch("Float", "missing argument"))?;
            f(bridge, x).map(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ClassBinding, ResultLowering};

    #[test]
    fn test_rounding_codes() {
        for (code, mode) in Rounding::ALL.iter().enumerate() {
            assert_eq!(mode.as_raw(), code as i32);
            assert_eq!(Rounding::from_raw(code as i32), Some(*mode));
            assert_eq!(Rounding::from_name(mode.name()), Some(*mode));
        }
        assert_eq!(Rounding::from_raw(6), None);
        assert_eq!(Rounding::from_raw(-1), None);
    }

    #[test]
    fn test_rounding_names_match_config() {
        let names: Vec<_> = Rounding::ALL.iter().map(|r| r.name()).collect();
        assert_eq!(names, gnump_config::ROUNDING_NAMES);
    }

    #[test]
    fn test_descriptors_generate() {
        for descriptor in classes() {
            ClassBinding::generate(descriptor).unwrap();
        }
    }

    #[test]
    fn test_float_mutators_chain() {
        let binding = ClassBinding::generate(&FLOAT_CLASS).unwrap();
        for name in ["set", "add", "mul", "zeta", "swap", "set_rounding"] {
            assert_eq!(
                binding.method(name).unwrap().lowering,
                ResultLowering::Receiver,
                "{} should return its receiver",
                name
            );
        }
        assert_eq!(
            binding.method("clone").unwrap().lowering,
            ResultLowering::Wrap(FLOAT)
        );
    }

    #[test]
    fn test_opaque_classes_are_not_constructible() {
        assert!(!VOID_PTR_CLASS.is_constructible());
        assert!(!INTEGRAND_CLASS.is_constructible());
        assert!(INTEGRAND_CLASS.callable.is_some());
    }
}
