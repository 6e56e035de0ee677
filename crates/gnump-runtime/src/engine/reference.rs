//! Reference numeric entry points
//!
//! Installs the float, integrand and tanh-sinh symbols on a
//! [`LinearEngine`]. Values are carried as f64 and rounded to each float's
//! precision (when below 53 bits) in its own rounding mode after every
//! operation, so the bridge can be exercised end to end without a real
//! arbitrary-precision library.
//!
//! Float layout, 16 bytes:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | precision, u32 |
//! | 4 | rounding code, i32 |
//! | 8 | value, f64 |
//!
//! Integrator layout, 40 bytes: precision, point budget, integrand, call
//! count, then pointers to the lower bound, upper bound, integral and error
//! floats it owns, then the abscissa table length. `compile` sets the table
//! length; `integrate` refuses to run before it.

use super::{load, store, EngineError, ForeignEngine, HostCallbacks, LinearEngine};
use crate::numeric::Rounding;
use crate::value::{ForeignPtr, RawValue};
use gnump_config::BridgeConfig;
use std::cell::Cell;
use std::f64::consts::{FRAC_PI_2, PI};
use std::rc::Rc;
use tracing::{debug, trace};

const FLOAT_SIZE: u32 = 16;
const PREC: u32 = 0;
const ROUND: u32 = 4;
const VALUE: u32 = 8;

const TANH_SINH_SIZE: u32 = 40;
const TS_PREC: u32 = 0;
const TS_POINTS: u32 = 4;
const TS_INTEGRAND: u32 = 8;
const TS_CALLS: u32 = 12;
const TS_LOWER: u32 = 16;
const TS_UPPER: u32 = 20;
const TS_INTEGRAL: u32 = 24;
const TS_ERROR: u32 = 28;
const TS_TABLE: u32 = 32;

/// Abscissa cutoff in t
const T_MAX: f64 = 3.5;
const MAX_LEVEL: u32 = 12;

/// B2..B12
const BERNOULLI: [f64; 6] = [
    1.0 / 6.0,
    -1.0 / 30.0,
    1.0 / 42.0,
    -1.0 / 30.0,
    5.0 / 66.0,
    -691.0 / 2730.0,
];

/// State shared by the installed entry points
#[derive(Debug, Default)]
struct Shared {
    default_rounding: Cell<Rounding>,
    /// Engine-owned buffer behind the last returned string
    text: Cell<ForeignPtr>,
}

/// Build an engine from configuration with every numeric symbol installed
pub fn engine(config: &BridgeConfig) -> Result<Rc<LinearEngine>, EngineError> {
    let engine = LinearEngine::from_config(config)?;
    install(&engine);
    Ok(Rc::new(engine))
}

/// Install the numeric entry points
pub fn install(engine: &LinearEngine) {
    let shared = Rc::new(Shared::default());
    install_float(engine, &shared);
    install_tanh_sinh(engine, &shared);

    for symbol in ["VoidPtr_destroy", "Integrand_destroy"] {
        engine.define(symbol, 1, move |e, args, _| {
            let ptr = Params::new(symbol, args).ptr(0)?;
            e.release(ptr)?;
            Ok(RawValue::Void)
        });
    }
    debug!("reference entry points installed");
}

/// Positional access to raw arguments
struct Params<'a> {
    symbol: &'a str,
    args: &'a [RawValue],
}

impl<'a> Params<'a> {
    fn new(symbol: &'a str, args: &'a [RawValue]) -> Self {
        Self { symbol, args }
    }

    fn bad(&self, index: usize, expected: &'static str) -> EngineError {
        EngineError::BadArgument {
            symbol: self.symbol.to_string(),
            index,
            expected,
        }
    }

    fn ptr(&self, index: usize) -> Result<ForeignPtr, EngineError> {
        Some(self.nullable_ptr(index)?)
            .filter(|ptr| !ptr.is_null())
            .ok_or_else(|| self.bad(index, "a non-null pointer"))
    }

    fn nullable_ptr(&self, index: usize) -> Result<ForeignPtr, EngineError> {
        self.args
            .get(index)
            .and_then(RawValue::as_ptr)
            .ok_or_else(|| self.bad(index, "a pointer"))
    }

    fn int(&self, index: usize) -> Result<i32, EngineError> {
        self.args
            .get(index)
            .and_then(RawValue::as_i32)
            .ok_or_else(|| self.bad(index, "an int"))
    }

    fn double(&self, index: usize) -> Result<f64, EngineError> {
        self.args
            .get(index)
            .and_then(RawValue::as_f64)
            .ok_or_else(|| self.bad(index, "a double"))
    }

    fn precision(&self, index: usize) -> Result<u32, EngineError> {
        u32::try_from(self.int(index)?)
            .ok()
            .filter(|prec| *prec > 0)
            .ok_or_else(|| self.bad(index, "a positive precision"))
    }

    fn rounding(&self, index: usize) -> Result<Rounding, EngineError> {
        Rounding::from_raw(self.int(index)?).ok_or_else(|| self.bad(index, "a rounding code 0..=5"))
    }
}

/// Round `value` to `prec` significant bits
fn quantize(value: f64, prec: u32, rounding: Rounding) -> f64 {
    if prec >= f64::MANTISSA_DIGITS || value == 0.0 || !value.is_finite() {
        return value;
    }
    let exponent = value.abs().log2().floor() as i32;
    let scale = 2f64.powi(prec as i32 - 1 - exponent);
    if !scale.is_finite() || scale == 0.0 {
        return value;
    }
    let scaled = value * scale;
    let rounded = match rounding {
        Rounding::TowardZero => scaled.trunc(),
        Rounding::TowardInfinity => scaled.ceil(),
        Rounding::TowardMinusInfinity => scaled.floor(),
        Rounding::AwayZero if scaled >= 0.0 => scaled.ceil(),
        Rounding::AwayZero => scaled.floor(),
        Rounding::Nearest | Rounding::Faithful => scaled.round(),
    };
    rounded / scale
}

fn float_new(
    engine: &LinearEngine,
    prec: u32,
    rounding: Rounding,
    value: f64,
) -> Result<ForeignPtr, EngineError> {
    let ptr = engine.allocate(FLOAT_SIZE)?;
    if ptr.is_null() {
        return Ok(ptr);
    }
    store(engine, ptr.addr() + PREC, prec)?;
    store(engine, ptr.addr() + ROUND, rounding.as_raw())?;
    store(engine, ptr.addr() + VALUE, quantize(value, prec, rounding))?;
    Ok(ptr)
}

fn get(engine: &LinearEngine, ptr: ForeignPtr) -> Result<f64, EngineError> {
    load::<f64, _>(engine, ptr.addr() + VALUE)
}

fn rounding_of(engine: &LinearEngine, ptr: ForeignPtr) -> Result<Rounding, EngineError> {
    let raw = load::<i32, _>(engine, ptr.addr() + ROUND)?;
    Rounding::from_raw(raw).ok_or_else(|| EngineError::Trap(format!("corrupt rounding {} at {}", raw, ptr)))
}

/// Store `value` rounded to the float's precision
fn put(engine: &LinearEngine, ptr: ForeignPtr, value: f64) -> Result<(), EngineError> {
    let prec = load::<u32, _>(engine, ptr.addr() + PREC)?;
    let rounding = rounding_of(engine, ptr)?;
    store(engine, ptr.addr() + VALUE, quantize(value, prec, rounding))
}

/// Copy `text` into the shared engine-owned buffer, freeing the previous one
fn owned_str(engine: &LinearEngine, shared: &Shared, text: &str) -> Result<RawValue, EngineError> {
    engine.release(shared.text.replace(ForeignPtr::NULL))?;
    let len = text.len() as u32 + 1;
    let ptr = engine.allocate(len)?;
    if ptr.is_null() {
        return Err(EngineError::Trap(format!("no memory for a {} byte string", len)));
    }
    let mut bytes = Vec::with_capacity(len as usize);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    engine.write_bytes(ptr.addr(), &bytes)?;
    shared.text.set(ptr);
    Ok(RawValue::from(ptr))
}

fn parse_radix(text: &str, base: u32) -> Option<f64> {
    let text = text.trim();
    if base == 10 {
        return text.parse().ok();
    }
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let radix = base as f64;
    let mut value = 0.0;
    for c in whole.chars() {
        value = value * radix + c.to_digit(base)? as f64;
    }
    let mut scale = 1.0 / radix;
    for c in fraction.chars() {
        value += c.to_digit(base)? as f64 * scale;
        scale /= radix;
    }
    Some(if negative { -value } else { value })
}

fn zeta(s: f64) -> f64 {
    if s.is_nan() {
        return f64::NAN;
    }
    if s == 1.0 {
        return f64::INFINITY;
    }
    if s == f64::INFINITY {
        return 1.0;
    }
    // Euler-Maclaurin with sixteen explicit terms
    const N: f64 = 16.0;
    let mut sum: f64 = (1..16).map(|n| (n as f64).powf(-s)).sum();
    sum += N.powf(1.0 - s) / (s - 1.0) + 0.5 * N.powf(-s);

    let mut rising = s;
    let mut factorial = 2.0;
    let mut power = N.powf(-s - 1.0);
    for (k, b) in BERNOULLI.iter().enumerate() {
        sum += b / factorial * rising * power;
        let m = 2.0 * (k as f64 + 1.0);
        rising *= (s + m - 1.0) * (s + m);
        factorial *= (m + 1.0) * (m + 2.0);
        power /= N * N;
    }
    sum
}

fn root(x: f64, k: i32) -> f64 {
    match k {
        k if k <= 0 => f64::NAN,
        1 => x,
        2 => x.sqrt(),
        3 => x.cbrt(),
        k if x < 0.0 && k % 2 == 1 => -(-x).powf(1.0 / k as f64),
        k => x.powf(1.0 / k as f64),
    }
}

/// Binary exponent in the `[0.5, 1)` mantissa convention
fn exponent(x: f64) -> i32 {
    if x == 0.0 || !x.is_finite() {
        0
    } else {
        x.abs().log2().floor() as i32 + 1
    }
}

fn rec_sqrt(x: f64) -> f64 {
    1.0 / x.sqrt()
}

fn neg(x: f64) -> f64 {
    -x
}

fn add(a: f64, b: f64) -> f64 {
    a + b
}

fn sub(a: f64, b: f64) -> f64 {
    a - b
}

fn mul(a: f64, b: f64) -> f64 {
    a * b
}

fn div(a: f64, b: f64) -> f64 {
    a / b
}

const UNARY: &[(&str, fn(f64) -> f64)] = &[
    ("Float_sqrt", f64::sqrt),
    ("Float_rec_sqrt", rec_sqrt),
    ("Float_cbrt", f64::cbrt),
    ("Float_neg", neg),
    ("Float_abs", f64::abs),
    ("Float_exp", f64::exp),
    ("Float_log", f64::ln),
    ("Float_sin", f64::sin),
    ("Float_cos", f64::cos),
    ("Float_zeta", zeta),
    ("Float_floor", f64::floor),
    ("Float_ceil", f64::ceil),
    ("Float_trunc", f64::trunc),
];

const BINARY: &[(&str, &str, fn(f64, f64) -> f64)] = &[
    ("Float_add", "Float_add_d", add),
    ("Float_sub", "Float_sub_d", sub),
    ("Float_mul", "Float_mul_d", mul),
    ("Float_div", "Float_div_d", div),
];

const PREDICATES: &[(&str, fn(f64) -> bool)] = &[
    ("Float_is_zero", |x| x == 0.0),
    ("Float_is_nan", f64::is_nan),
    ("Float_is_inf", f64::is_infinite),
    ("Float_is_integer", |x| x.is_finite() && x.fract() == 0.0),
];

const COMPARISONS: &[(&str, fn(f64, f64) -> bool)] = &[
    ("Float_less", |a, b| a < b),
    ("Float_greater", |a, b| a > b),
    ("Float_equal", |a, b| a == b),
    // negations of the strict tests, so NaN compares true
    ("Float_less_equal", |a, b| !(a > b)),
    ("Float_greater_equal", |a, b| !(a < b)),
    ("Float_not_equal", |a, b| a != b),
];

fn install_float(engine: &LinearEngine, shared: &Rc<Shared>) {
    let state = shared.clone();
    engine.define("Float_new_1", 1, move |e, args, _| {
        let prec = Params::new("Float_new_1", args).precision(0)?;
        Ok(RawValue::from(float_new(e, prec, state.default_rounding.get(), f64::NAN)?))
    });
    let state = shared.clone();
    engine.define("Float_new_2", 2, move |e, args, _| {
        let p = Params::new("Float_new_2", args);
        let ptr = float_new(e, p.precision(0)?, state.default_rounding.get(), p.double(1)?)?;
        Ok(RawValue::from(ptr))
    });
    engine.define("Float_destroy", 1, |e, args, _| {
        e.release(Params::new("Float_destroy", args).ptr(0)?)?;
        Ok(RawValue::Void)
    });
    // No free lists to drop; counted so callers can see it was requested
    engine.define("Float_free_cache", 0, |_, _, _| Ok(RawValue::Void));

    engine.define("Float_set_d", 2, |e, args, _| {
        let p = Params::new("Float_set_d", args);
        put(e, p.ptr(0)?, p.double(1)?)?;
        Ok(RawValue::Void)
    });
    engine.define("Float_set", 2, |e, args, _| {
        let p = Params::new("Float_set", args);
        let value = get(e, p.ptr(1)?)?;
        put(e, p.ptr(0)?, value)?;
        Ok(RawValue::Void)
    });
    engine.define("Float_set_str", 3, |e, args, _| {
        let p = Params::new("Float_set_str", args);
        let target = p.ptr(0)?;
        let text = e.read_c_string(p.ptr(1)?)?;
        let base = match p.int(2)? {
            0 => 10,
            base @ 2..=36 => base as u32,
            _ => return Err(p.bad(2, "a base in 2..=36")),
        };
        let value = parse_radix(&text, base)
            .ok_or_else(|| EngineError::Trap(format!("cannot parse '{}' in base {}", text, base)))?;
        put(e, target, value)?;
        Ok(RawValue::Void)
    });
    engine.define("Float_set_rounding", 2, |e, args, _| {
        let p = Params::new("Float_set_rounding", args);
        let ptr = p.ptr(0)?;
        store(e, ptr.addr() + ROUND, p.rounding(1)?.as_raw())?;
        Ok(RawValue::Void)
    });
    // Changing precision discards the value
    engine.define("Float_set_prec", 2, |e, args, _| {
        let p = Params::new("Float_set_prec", args);
        let ptr = p.ptr(0)?;
        store(e, ptr.addr() + PREC, p.precision(1)?)?;
        store(e, ptr.addr() + VALUE, f64::NAN)?;
        Ok(RawValue::Void)
    });

    for &(symbol, op) in UNARY {
        engine.define(symbol, 1, move |e, args, _| {
            let ptr = Params::new(symbol, args).ptr(0)?;
            put(e, ptr, op(get(e, ptr)?))?;
            Ok(RawValue::Void)
        });
    }
    for &(symbol, symbol_d, op) in BINARY {
        engine.define(symbol, 2, move |e, args, _| {
            let p = Params::new(symbol, args);
            let ptr = p.ptr(0)?;
            let rhs = get(e, p.ptr(1)?)?;
            put(e, ptr, op(get(e, ptr)?, rhs))?;
            Ok(RawValue::Void)
        });
        engine.define(symbol_d, 2, move |e, args, _| {
            let p = Params::new(symbol_d, args);
            let ptr = p.ptr(0)?;
            put(e, ptr, op(get(e, ptr)?, p.double(1)?))?;
            Ok(RawValue::Void)
        });
    }
    engine.define("Float_root_ui", 2, |e, args, _| {
        let p = Params::new("Float_root_ui", args);
        let ptr = p.ptr(0)?;
        put(e, ptr, root(get(e, ptr)?, p.int(1)?))?;
        Ok(RawValue::Void)
    });
    engine.define("Float_swap", 2, |e, args, _| {
        let p = Params::new("Float_swap", args);
        let (a, b) = (p.ptr(0)?, p.ptr(1)?);
        let bytes_a = e.read_bytes(a.addr(), FLOAT_SIZE)?;
        let bytes_b = e.read_bytes(b.addr(), FLOAT_SIZE)?;
        e.write_bytes(a.addr(), &bytes_b)?;
        e.write_bytes(b.addr(), &bytes_a)?;
        Ok(RawValue::Void)
    });
    engine.define("Float_const_pi", 1, |e, args, _| {
        put(e, Params::new("Float_const_pi", args).ptr(0)?, PI)?;
        Ok(RawValue::Void)
    });

    engine.define("Float_clone", 1, |e, args, _| {
        let ptr = Params::new("Float_clone", args).ptr(0)?;
        let prec = load::<u32, _>(e, ptr.addr() + PREC)?;
        let copy = float_new(e, prec, rounding_of(e, ptr)?, get(e, ptr)?)?;
        Ok(RawValue::from(copy))
    });
    engine.define("Float_get_d", 1, |e, args, _| {
        Ok(RawValue::F64(get(e, Params::new("Float_get_d", args).ptr(0)?)?))
    });
    let state = shared.clone();
    engine.define("Float_to_string", 1, move |e, args, _| {
        let value = get(e, Params::new("Float_to_string", args).ptr(0)?)?;
        owned_str(e, &state, &value.to_string())
    });
    engine.define("Float_get_prec", 1, |e, args, _| {
        let ptr = Params::new("Float_get_prec", args).ptr(0)?;
        Ok(RawValue::I32(load::<i32, _>(e, ptr.addr() + PREC)?))
    });
    engine.define("Float_get_rounding", 1, |e, args, _| {
        let ptr = Params::new("Float_get_rounding", args).ptr(0)?;
        Ok(RawValue::I32(rounding_of(e, ptr)?.as_raw()))
    });
    for &(symbol, test) in PREDICATES {
        engine.define(symbol, 1, move |e, args, _| {
            let ptr = Params::new(symbol, args).ptr(0)?;
            Ok(RawValue::from(test(get(e, ptr)?)))
        });
    }
    for &(symbol, test) in COMPARISONS {
        engine.define(symbol, 2, move |e, args, _| {
            let p = Params::new(symbol, args);
            Ok(RawValue::from(test(get(e, p.ptr(0)?)?, get(e, p.ptr(1)?)?)))
        });
    }

    engine.define("Float_op_sum", 3, |e, args, _| {
        let p = Params::new("Float_op_sum", args);
        let (target, values) = (p.ptr(0)?, p.ptr(1)?);
        let count = u32::try_from(p.int(2)?).map_err(|_| p.bad(2, "a non-negative count"))?;
        let mut sum = 0.0;
        for i in 0..count {
            sum += load::<f64, _>(e, values.addr() + 8 * i)?;
        }
        put(e, target, sum)?;
        Ok(RawValue::Void)
    });
    engine.define("Float_op_dot", 4, |e, args, _| {
        let p = Params::new("Float_op_dot", args);
        let (target, xs, ys) = (p.ptr(0)?, p.ptr(1)?, p.ptr(2)?);
        let count = u32::try_from(p.int(3)?).map_err(|_| p.bad(3, "a non-negative count"))?;
        let mut dot = 0.0;
        for i in 0..count {
            dot += load::<f64, _>(e, xs.addr() + 8 * i)? * load::<f64, _>(e, ys.addr() + 8 * i)?;
        }
        put(e, target, dot)?;
        Ok(RawValue::Void)
    });
    let state = shared.clone();
    engine.define("Float_set_default_rounding", 1, move |_, args, _| {
        let rounding = Params::new("Float_set_default_rounding", args).rounding(0)?;
        state.default_rounding.set(rounding);
        trace!(%rounding, "default rounding set");
        Ok(RawValue::Void)
    });
    let state = shared.clone();
    engine.define("Float_get_version", 0, move |e, _, _| {
        owned_str(e, &state, &format!("gnump-reference {}", crate::VERSION))
    });
}

fn install_tanh_sinh(engine: &LinearEngine, shared: &Rc<Shared>) {
    for (symbol, arity) in [("TanhSinh_new_1", 1), ("TanhSinh_new_2", 2)] {
        let state = shared.clone();
        engine.define(symbol, arity, move |e, args, _| {
            let p = Params::new(symbol, args);
            let prec = p.precision(0)?;
            let points = if arity == 2 {
                u32::try_from(p.int(1)?).map_err(|_| p.bad(1, "a non-negative point count"))?
            } else {
                prec.saturating_mul(16)
            };
            let ptr = tanh_sinh_new(e, prec, points, state.default_rounding.get())?;
            Ok(RawValue::from(ptr))
        });
    }
    engine.define("TanhSinh_destroy", 1, |e, args, _| {
        let ptr = Params::new("TanhSinh_destroy", args).ptr(0)?;
        for offset in [TS_LOWER, TS_UPPER, TS_INTEGRAL, TS_ERROR] {
            e.release(ForeignPtr(load::<u32, _>(e, ptr.addr() + offset)?))?;
        }
        e.release(ptr)?;
        Ok(RawValue::Void)
    });

    engine.define("TanhSinh_set_integrand", 2, |e, args, _| {
        let p = Params::new("TanhSinh_set_integrand", args);
        let integrand = p.nullable_ptr(1)?;
        store(e, p.ptr(0)?.addr() + TS_INTEGRAND, integrand.addr())?;
        Ok(RawValue::Void)
    });
    engine.define("TanhSinh_set_bounds", 3, |e, args, _| {
        let p = Params::new("TanhSinh_set_bounds", args);
        let ptr = p.ptr(0)?;
        copy_into(e, ptr, TS_LOWER, p.ptr(1)?)?;
        copy_into(e, ptr, TS_UPPER, p.ptr(2)?)?;
        Ok(RawValue::Void)
    });
    for (symbol, offset) in [
        ("TanhSinh_set_lower_bound", TS_LOWER),
        ("TanhSinh_set_upper_bound", TS_UPPER),
    ] {
        engine.define(symbol, 2, move |e, args, _| {
            let p = Params::new(symbol, args);
            copy_into(e, p.ptr(0)?, offset, p.ptr(1)?)?;
            Ok(RawValue::Void)
        });
    }
    for (symbol, offset) in [
        ("TanhSinh_get_lower_bound", TS_LOWER),
        ("TanhSinh_get_upper_bound", TS_UPPER),
        ("TanhSinh_get_integral_approx", TS_INTEGRAL),
        ("TanhSinh_get_absolute_error_approx", TS_ERROR),
    ] {
        engine.define(symbol, 1, move |e, args, _| {
            let ptr = Params::new(symbol, args).ptr(0)?;
            Ok(RawValue::I32(load::<i32, _>(e, ptr.addr() + offset)?))
        });
    }
    engine.define("TanhSinh_is_convergent_error", 1, |e, args, _| {
        let ptr = Params::new("TanhSinh_is_convergent_error", args).ptr(0)?;
        let error = get(e, sub_float(e, ptr, TS_ERROR)?)?;
        Ok(RawValue::from(error < 0.0))
    });
    engine.define("TanhSinh_get_relative_error_exponent", 1, |e, args, _| {
        let ptr = Params::new("TanhSinh_get_relative_error_exponent", args).ptr(0)?;
        let error = get(e, sub_float(e, ptr, TS_ERROR)?)?;
        let integral = get(e, sub_float(e, ptr, TS_INTEGRAL)?)?;
        Ok(RawValue::I32(exponent(error) - exponent(integral)))
    });
    engine.define("TanhSinh_get_integrand_call_count", 1, |e, args, _| {
        let ptr = Params::new("TanhSinh_get_integrand_call_count", args).ptr(0)?;
        Ok(RawValue::I32(load::<i32, _>(e, ptr.addr() + TS_CALLS)?))
    });

    engine.define("TanhSinh_compile", 1, |e, args, _| {
        let ptr = Params::new("TanhSinh_compile", args).ptr(0)?;
        let points = load::<u32, _>(e, ptr.addr() + TS_POINTS)?;
        let len = points.saturating_mul(2).saturating_add(8);
        store(e, ptr.addr() + TS_TABLE, len)?;
        trace!(%ptr, len, "integrator compiled");
        Ok(RawValue::Void)
    });

    let state = shared.clone();
    engine.define("TanhSinh_integrate", 1, move |e, args, host| {
        let ptr = Params::new("TanhSinh_integrate", args).ptr(0)?;
        integrate(e, host, ptr, state.default_rounding.get())?;
        Ok(RawValue::Void)
    });
}

fn tanh_sinh_new(
    engine: &LinearEngine,
    prec: u32,
    points: u32,
    rounding: Rounding,
) -> Result<ForeignPtr, EngineError> {
    let ptr = engine.allocate(TANH_SINH_SIZE)?;
    if ptr.is_null() {
        return Ok(ptr);
    }
    let mut owned = Vec::with_capacity(4);
    for _ in 0..4 {
        let float = float_new(engine, prec, rounding, f64::NAN)?;
        if float.is_null() {
            for held in owned {
                engine.release(held)?;
            }
            engine.release(ptr)?;
            return Ok(ForeignPtr::NULL);
        }
        owned.push(float);
    }
    store(engine, ptr.addr() + TS_PREC, prec)?;
    store(engine, ptr.addr() + TS_POINTS, points)?;
    store(engine, ptr.addr() + TS_INTEGRAND, 0u32)?;
    store(engine, ptr.addr() + TS_CALLS, 0u32)?;
    store(engine, ptr.addr() + TS_TABLE, 0u32)?;
    for (offset, float) in [TS_LOWER, TS_UPPER, TS_INTEGRAL, TS_ERROR].into_iter().zip(owned) {
        store(engine, ptr.addr() + offset, float.addr())?;
    }
    Ok(ptr)
}

fn sub_float(engine: &LinearEngine, ptr: ForeignPtr, offset: u32) -> Result<ForeignPtr, EngineError> {
    Ok(ForeignPtr(load::<u32, _>(engine, ptr.addr() + offset)?))
}

fn copy_into(
    engine: &LinearEngine,
    ptr: ForeignPtr,
    offset: u32,
    source: ForeignPtr,
) -> Result<(), EngineError> {
    let value = get(engine, source)?;
    put(engine, sub_float(engine, ptr, offset)?, value)
}

/// Integration interval as center and half-width
#[derive(Debug, Clone, Copy)]
struct Interval {
    a: f64,
    b: f64,
    center: f64,
    half: f64,
}

/// Integrand evaluation through the host, reusing one argument float
struct Evaluator<'a> {
    engine: &'a LinearEngine,
    host: &'a dyn HostCallbacks,
    integrand: ForeignPtr,
    arg: ForeignPtr,
    calls: u32,
}

impl Evaluator<'_> {
    fn eval(&mut self, x: f64) -> Result<f64, EngineError> {
        put(self.engine, self.arg, x)?;
        self.calls += 1;
        match self.host.invoke(self.integrand, &[RawValue::from(self.arg)])? {
            RawValue::F64(y) => Ok(y),
            other => Err(EngineError::Trap(format!(
                "integrand returned {} instead of a double",
                other.type_name()
            ))),
        }
    }

    /// Weighted sum over the symmetric node pair at `t`
    fn pair(&mut self, interval: &Interval, t: f64) -> Result<f64, EngineError> {
        let u = FRAC_PI_2 * t.sinh();
        let weight = interval.half * FRAC_PI_2 * t.cosh() / (u.cosh() * u.cosh());
        if weight == 0.0 {
            return Ok(0.0);
        }
        let offset = interval.half * u.tanh();
        let mut total = 0.0;
        for x in [interval.center + offset, interval.center - offset] {
            // endpoints may be singular
            if x == interval.a || x == interval.b {
                continue;
            }
            total += weight * self.eval(x)?;
        }
        Ok(total)
    }
}

/// Tanh-sinh quadrature over the integrator's bounds
///
/// A negative stored error marks an estimate that did not converge.
fn integrate(
    engine: &LinearEngine,
    host: &dyn HostCallbacks,
    ptr: ForeignPtr,
    rounding: Rounding,
) -> Result<(), EngineError> {
    let prec = load::<u32, _>(engine, ptr.addr() + TS_PREC)?;
    let points = load::<u32, _>(engine, ptr.addr() + TS_POINTS)?;
    let integrand = ForeignPtr(load::<u32, _>(engine, ptr.addr() + TS_INTEGRAND)?);
    if integrand.is_null() {
        return Err(EngineError::Trap("integrator has no integrand".to_string()));
    }
    if load::<u32, _>(engine, ptr.addr() + TS_TABLE)? == 0 {
        return Err(EngineError::Trap("integrator was not compiled".to_string()));
    }
    let a = get(engine, sub_float(engine, ptr, TS_LOWER)?)?;
    let b = get(engine, sub_float(engine, ptr, TS_UPPER)?)?;
    if !a.is_finite() || !b.is_finite() {
        return Err(EngineError::Trap(format!(
            "integration bounds [{}, {}] are not finite",
            a, b
        )));
    }

    let arg = float_new(engine, prec, rounding, f64::NAN)?;
    if arg.is_null() {
        return Err(EngineError::Trap(
            "no memory for the integrand argument".to_string(),
        ));
    }
    let mut evaluator = Evaluator {
        engine,
        host,
        integrand,
        arg,
        calls: 0,
    };
    let interval = Interval {
        a,
        b,
        center: (a + b) / 2.0,
        half: (b - a) / 2.0,
    };
    let outcome = quadrature(&mut evaluator, &interval, prec, points);
    let calls = evaluator.calls;
    engine.release(arg)?;
    let (integral, error) = outcome?;

    store(engine, ptr.addr() + TS_CALLS, calls)?;
    put(engine, sub_float(engine, ptr, TS_INTEGRAL)?, integral)?;
    put(engine, sub_float(engine, ptr, TS_ERROR)?, error)?;
    debug!(integral, error, calls, "integration finished");
    Ok(())
}

/// Halve the step until successive estimates agree or the point budget runs out
fn quadrature(
    evaluator: &mut Evaluator<'_>,
    interval: &Interval,
    prec: u32,
    points: u32,
) -> Result<(f64, f64), EngineError> {
    if interval.half == 0.0 {
        return Ok((0.0, 0.0));
    }
    let tolerance = 2f64
        .powi(-(prec.min(1000) as i32))
        .max(64.0 * f64::EPSILON);

    let mut h = 1.0;
    let mut sum = interval.half * FRAC_PI_2 * evaluator.eval(interval.center)?;
    let mut k = 1.0;
    while k * h <= T_MAX {
        sum += evaluator.pair(interval, k * h)?;
        k += 1.0;
    }
    let mut estimate = h * sum;
    let mut diff = f64::INFINITY;

    for level in 1..=MAX_LEVEL {
        h /= 2.0;
        let nodes = ((T_MAX / h + 1.0) / 2.0).floor() as u32;
        if evaluator.calls + 2 * nodes > points {
            trace!(level, points, "point budget exhausted");
            break;
        }
        for j in 1..=nodes {
            sum += evaluator.pair(interval, (2 * j - 1) as f64 * h)?;
        }
        let next = h * sum;
        diff = (next - estimate).abs();
        estimate = next;
        trace!(level, estimate, diff, "refined");
        if diff <= tolerance * estimate.abs() {
            return Ok((estimate, diff));
        }
    }

    let error = if diff.is_finite() { diff } else { estimate.abs() };
    Ok((estimate, -error.max(f64::MIN_POSITIVE)))
}
