use serde::{Deserialize, Serialize};

pub type Args = Vec<Arg>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
#[serde(rename_all = "lowercase")]
pub enum Arg {
    Int(i64),
    String(String),
    Bool(bool),
    Float(f64),
    Timestamp(i64),
    Interval(String),
    Column(String),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::String(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::String(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

// for deserialize only
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NamedArg {
    pub name: String,
    #[serde(flatten)]
    pub arg: Arg,
}

/// An entry of the parameter list, named entries carry a `name` key next to `type` and `value`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawArg {
    Named(NamedArg),
    Positional(Arg),
}

/// Split a parameter list into positional and named arguments, keeping their order.
pub(crate) fn split_args(raw: Vec<RawArg>) -> (Args, Vec<(String, Arg)>) {
    let mut positional = Vec::new();
    let mut named = Vec::new();
    for arg in raw {
        match arg {
            RawArg::Named(NamedArg { name, arg }) => named.push((name, arg)),
            RawArg::Positional(arg) => positional.push(arg),
        }
    }
    (positional, named)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArgType {
    Int,
    String,
    Bool,
    Float,
    Timestamp,
    Interval,
    Column,
}

impl Arg {
    pub fn is_scalar(&self) -> bool {
        use Arg as T;
        matches!(
            self,
            T::Int(_) | T::String(_) | T::Bool(_) | T::Float(_) | T::Timestamp(_) | T::Interval(_)
        )
    }

    pub fn is_column(&self) -> bool {
        use Arg as T;
        matches!(self, T::Column(_))
    }

    pub fn arg_type(&self) -> ArgType {
        match self {
            Arg::Int(_) => ArgType::Int,
            Arg::String(_) => ArgType::String,
            Arg::Bool(_) => ArgType::Bool,
            Arg::Float(_) => ArgType::Float,
            Arg::Timestamp(_) => ArgType::Timestamp,
            Arg::Interval(_) => ArgType::Interval,
            Arg::Column(_) => ArgType::Column,
        }
    }
}
