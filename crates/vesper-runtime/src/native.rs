//! The native bridge: host functions behind the language's call contract.
//!
//! A bridged function declares its arity and, optionally, per-parameter
//! numeric representations at construction time. Calls check the arity
//! exactly (the host function is never invoked on a mismatch), narrow
//! numeric arguments through the declared representations, and dispatch
//! with a slice-of-arguments convention. Void host functions are
//! distinguished at construction and their result is normalized to null.
use std::fmt;

use vesper_core::string::StringInterner;

use crate::coerce::NumericRepr;
use crate::error::RuntimeError;
use crate::value::Value;

/// Maximum parameters a bridged host function may declare.
pub const MAX_PARAMS: usize = 15;

/// Bridge construction error. Fails fast, before any script code can
/// reference the function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeError {
    /// The host function declares more than [`MAX_PARAMS`] parameters.
    TooManyParams { name: String, count: usize },
    /// The coercion table length does not match the declared arity.
    CoercionArity {
        name: String,
        declared: usize,
        expected: usize,
    },
    /// A native is already registered under this global name.
    AlreadyRegistered(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::TooManyParams { name, count } => write!(
                f,
                "cannot bridge '{name}': {count} params exceeds the maximum of {MAX_PARAMS}"
            ),
            BridgeError::CoercionArity {
                name,
                declared,
                expected,
            } => write!(
                f,
                "cannot bridge '{name}': coercion table has {declared} entries for {expected} params"
            ),
            BridgeError::AlreadyRegistered(name) => {
                write!(f, "a native named '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for BridgeError {}

/// Context handed to a host function: its arguments plus the interner, so
/// hosts can read and produce string values.
pub struct NativeContext<'a> {
    pub args: &'a [Value],
    pub strings: &'a mut StringInterner,
}

/// The wrapped host callable: value-returning or void.
enum Backing {
    Returning(Box<dyn Fn(&mut NativeContext) -> Result<Value, RuntimeError>>),
    Void(Box<dyn Fn(&mut NativeContext) -> Result<(), RuntimeError>>),
}

/// A host function exposed to the language.
pub struct NativeFunction {
    name: String,
    param_count: usize,
    backing: Backing,
    /// Per-parameter numeric representations; present only when at least
    /// one parameter wants a non-canonical representation.
    coercions: Option<Vec<NumericRepr>>,
    /// Opt-in hook charging extra abstract cost per call, given the call's
    /// arguments.
    cost_penalizer: Option<Box<dyn Fn(&[Value]) -> u64>>,
}

impl NativeFunction {
    fn build(name: &str, param_count: usize, backing: Backing) -> Result<Self, BridgeError> {
        if param_count > MAX_PARAMS {
            return Err(BridgeError::TooManyParams {
                name: name.to_string(),
                count: param_count,
            });
        }
        Ok(NativeFunction {
            name: name.to_string(),
            param_count,
            backing,
            coercions: None,
            cost_penalizer: None,
        })
    }

    /// Bridge a value-returning host function.
    pub fn new(
        name: &str,
        param_count: usize,
        f: impl Fn(&mut NativeContext) -> Result<Value, RuntimeError> + 'static,
    ) -> Result<Self, BridgeError> {
        Self::build(name, param_count, Backing::Returning(Box::new(f)))
    }

    /// Bridge a void host function; its call result is null.
    pub fn new_void(
        name: &str,
        param_count: usize,
        f: impl Fn(&mut NativeContext) -> Result<(), RuntimeError> + 'static,
    ) -> Result<Self, BridgeError> {
        Self::build(name, param_count, Backing::Void(Box::new(f)))
    }

    /// Bridge a method-style host function: one implicit receiver parameter
    /// is added in front of the declared ones, and arrives as `args[0]`.
    pub fn method(
        name: &str,
        param_count: usize,
        f: impl Fn(&mut NativeContext) -> Result<Value, RuntimeError> + 'static,
    ) -> Result<Self, BridgeError> {
        Self::build(name, param_count + 1, Backing::Returning(Box::new(f)))
    }

    /// Method-style variant of [`NativeFunction::new_void`].
    pub fn method_void(
        name: &str,
        param_count: usize,
        f: impl Fn(&mut NativeContext) -> Result<(), RuntimeError> + 'static,
    ) -> Result<Self, BridgeError> {
        Self::build(name, param_count + 1, Backing::Void(Box::new(f)))
    }

    /// Declare the parameters' numeric representations. One entry per
    /// parameter (including a method's receiver). The table is kept only if
    /// some parameter wants a non-canonical representation.
    pub fn with_numeric_params(mut self, reprs: &[NumericRepr]) -> Result<Self, BridgeError> {
        if reprs.len() != self.param_count {
            return Err(BridgeError::CoercionArity {
                name: self.name.clone(),
                declared: reprs.len(),
                expected: self.param_count,
            });
        }
        if reprs.iter().any(|r| !r.is_default()) {
            self.coercions = Some(reprs.to_vec());
        }
        Ok(self)
    }

    /// Attach a cost-penalizer hook, charged on every call.
    pub fn with_cost_penalizer(mut self, f: impl Fn(&[Value]) -> u64 + 'static) -> Self {
        self.cost_penalizer = Some(Box::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Extra abstract cost this call should be charged.
    pub fn cost_penalty(&self, args: &[Value]) -> u64 {
        match &self.cost_penalizer {
            Some(f) => f(args),
            None => 0,
        }
    }

    /// Call the host function. Exact arity is enforced before anything else;
    /// on a mismatch the host side is never entered.
    pub fn invoke(
        &self,
        strings: &mut StringInterner,
        mut args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if args.len() != self.param_count {
            return Err(RuntimeError::Arity {
                name: self.name.clone(),
                expected: self.param_count,
                got: args.len(),
            });
        }
        if let Some(reprs) = &self.coercions {
            for (i, arg) in args.iter_mut().enumerate() {
                if reprs[i].is_default() {
                    continue;
                }
                match arg {
                    Value::Num(n) => *n = reprs[i].narrow(*n),
                    other => {
                        return Err(RuntimeError::msg(format!(
                            "{}: parameter {} expects a number, got {}",
                            self.name,
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
        }
        let mut ctx = NativeContext {
            args: &args,
            strings,
        };
        match &self.backing {
            Backing::Returning(f) => f(&mut ctx),
            Backing::Void(f) => {
                f(&mut ctx)?;
                Ok(Value::Null)
            }
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("param_count", &self.param_count)
            .finish()
    }
}
