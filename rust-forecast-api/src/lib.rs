use anyhow::Context;
use arg::{Arg, Args, RawArg, split_args};
use arrow::array::RecordBatch;
use derive_builder::Builder;
use serde::Serialize;
use std::sync::Arc;

use crate::arg::ArgType;

pub mod arg;

/// Build a table function from its registry and JSON encoded parameters.
///
/// `parameters` is a JSON list of `{"type", "value"}` entries, entries that also carry a `name`
/// are passed as named arguments.
pub fn create(
    registry: &FunctionRegistry,
    parameters: Option<&str>,
    timezone: &str,
) -> anyhow::Result<Box<dyn TableFunction>> {
    let create_closure = &(registry.init);
    let (parameters, named_arguments) = match parameters {
        Some(param) => {
            let raw: Vec<RawArg> = serde_json::from_str(param).context("serde json failed")?;
            let (positional, named) = split_args(raw);
            (Some(positional), named)
        }
        None => (None, Vec::new()),
    };
    let ctx = FunctionContext {
        parameters,
        named_arguments,
        timezone: String::from(timezone),
    };
    create_closure(ctx)
}

type TableFunctionInitialize =
    Arc<dyn Fn(FunctionContext) -> anyhow::Result<Box<dyn TableFunction>> + Send + Sync>;

#[derive(Builder)]
pub struct FunctionRegistry {
    #[builder(setter(into))]
    name: &'static str,
    init: TableFunctionInitialize,
    #[builder(setter(strip_option, each(name = "signature", into)))]
    signatures: Option<Vec<Signature>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("name", &self.name)
            .field("init", &Arc::as_ptr(&self.init))
            .field("signatures", &self.signatures)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signatures(&self) -> anyhow::Result<String> {
        serde_json::to_string(&self.signatures).context("Failed to get signatures")
    }

    /// Whether the positional arguments match one of the declared signatures.
    pub fn accepts(&self, args: &[Arg]) -> bool {
        let Some(signatures) = &self.signatures else {
            return true;
        };
        signatures.iter().any(|s| {
            s.args.len() == args.len() && s.args.iter().zip(args).all(|(t, a)| *t == a.arg_type())
        })
    }

    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Signature {
    pub args: Vec<ArgType>,
}

impl From<Vec<ArgType>> for Signature {
    fn from(value: Vec<ArgType>) -> Self {
        Signature { args: value }
    }
}

pub struct FunctionContext {
    pub parameters: Option<Args>,
    pub named_arguments: Vec<(String, Arg)>,
    pub timezone: String,
}

pub trait TableFunction {
    fn process(&mut self, input: RecordBatch) -> anyhow::Result<Option<RecordBatch>>;

    fn finalize(&mut self) -> anyhow::Result<Option<RecordBatch>> {
        Ok(None)
    }
}
