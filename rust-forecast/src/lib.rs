use std::sync::Arc;

use anyhow::Context;
use rust_forecast_api::{FunctionContext, FunctionRegistry, TableFunction};

use crate::funcs::*;

pub mod funcs;

pub fn get_function_registries() -> anyhow::Result<Vec<FunctionRegistry>> {
    Ok(vec![
        FunctionRegistry::builder()
            .name("lag_features")
            .init(Arc::new(|ctx: FunctionContext| {
                LagFeatures::new(ctx.parameters, ctx.named_arguments)
                    .map(|f| Box::new(f) as Box<dyn TableFunction>)
            }))
            .signature(vec![])
            .build()
            .context("create `lag_features` registry failed")?,
        FunctionRegistry::builder()
            .name("forecast")
            .init(Arc::new(|ctx: FunctionContext| {
                Forecast::new(ctx.parameters, ctx.named_arguments)
                    .map(|f| Box::new(f) as Box<dyn TableFunction>)
            }))
            .signature(vec![])
            .build()
            .context("create `forecast` registry failed")?,
    ])
}
