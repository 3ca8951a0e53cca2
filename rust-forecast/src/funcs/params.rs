use anyhow::{Context, Result, anyhow};
use forecast::date_features::DateFeature;
use forecast::transforms::{ParamValue, SeriesTransform, builtin_transform};
use forecast::{
    Differences, FitOptions, Frequency, LocalStandardScaler, TimeSeries, TimeSeriesConfig,
};
use rust_forecast_api::arg::{Arg, Args};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn reject_positional(params: Option<Args>) -> Result<()> {
    if let Some(params) = params {
        if params.iter().any(Arg::is_scalar) {
            return Err(anyhow!("Too many positional parameters."));
        }
    }
    Ok(())
}

pub(crate) fn string_arg(name: &str, arg: Arg) -> Result<String> {
    match arg {
        Arg::String(s) | Arg::Column(s) => Ok(s),
        _ => Err(anyhow!("Invalid type for {}. Expected string.", name)),
    }
}

pub(crate) fn usize_arg(name: &str, arg: Arg) -> Result<usize> {
    match arg {
        Arg::Int(i) if i >= 0 => Ok(i as usize),
        Arg::String(s) => s
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer")),
        _ => Err(anyhow!("{} must be a non-negative integer", name)),
    }
}

/// Any integer is accepted, values below one fall back to a single thread.
fn num_threads_arg(arg: Arg) -> Result<usize> {
    let requested = match arg {
        Arg::Int(i) => i,
        Arg::String(s) => s
            .trim()
            .parse()
            .context("num_threads must be an integer")?,
        _ => return Err(anyhow!("num_threads must be an integer")),
    };
    if requested < 1 {
        warn!(num_threads = requested, "num_threads must be at least 1, using 1 thread");
        return Ok(1);
    }
    Ok(requested as usize)
}

fn bool_arg(name: &str, arg: Arg) -> Result<bool> {
    match arg {
        Arg::Bool(b) => Ok(b),
        Arg::String(s) => s
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a boolean")),
        _ => Err(anyhow!("{} must be a boolean", name)),
    }
}

/// Comma separated list, empty entries are skipped.
fn list_arg(name: &str, arg: Arg) -> Result<Vec<String>> {
    let s = match arg {
        Arg::Int(i) => return Ok(vec![i.to_string()]),
        other => string_arg(name, other)?,
    };
    Ok(s.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect())
}

fn usize_list_arg(name: &str, arg: Arg) -> Result<Vec<usize>> {
    list_arg(name, arg)?
        .iter()
        .map(|v| {
            v.parse()
                .with_context(|| format!("{name} must hold non-negative integers, got {v}"))
        })
        .collect()
}

/// Parse `name:lag[:key=value...]` entries separated by `;`.
///
/// `rolling_mean:7:window_size=3;ewm_mean:1:alpha=0.5`
pub fn parse_lag_transforms(s: &str) -> Result<Vec<(usize, Arc<dyn SeriesTransform>)>> {
    let mut out = Vec::new();
    for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split(':').map(str::trim);
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow!("Missing transform name in {}", entry))?;
        let lag: usize = parts
            .next()
            .ok_or_else(|| anyhow!("Missing lag in {}", entry))?
            .parse()
            .with_context(|| format!("Invalid lag in {entry}"))?;
        let mut params = HashMap::new();
        for param in parts {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected key=value, got {} in {}", param, entry))?;
            let value: ParamValue = serde_json::from_str(value.trim())
                .with_context(|| format!("Invalid value for {key} in {entry}"))?;
            params.insert(key.trim().to_string(), value);
        }
        let transform = builtin_transform(name, &params)
            .with_context(|| format!("Invalid lag transform {entry}"))?;
        out.push((lag, transform));
    }
    Ok(out)
}

/// Arguments shared by every table function: columns, features and fitting options.
#[derive(Clone)]
pub struct SeriesParams {
    pub freq: Frequency,
    pub lags: Vec<usize>,
    pub lag_transforms: Vec<(usize, Arc<dyn SeriesTransform>)>,
    pub date_features: Vec<DateFeature>,
    pub num_threads: usize,
    pub differences: Vec<usize>,
    pub scale: bool,
    pub fit: FitOptions,
}

impl Default for SeriesParams {
    fn default() -> Self {
        SeriesParams {
            freq: Frequency::default(),
            lags: Vec::new(),
            lag_transforms: Vec::new(),
            date_features: Vec::new(),
            num_threads: 1,
            differences: Vec::new(),
            scale: false,
            fit: FitOptions::default(),
        }
    }
}

impl std::fmt::Debug for SeriesParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesParams")
            .field("freq", &self.freq.to_string())
            .field("lags", &self.lags)
            .field(
                "lag_transforms",
                &self
                    .lag_transforms
                    .iter()
                    .map(|(lag, t)| format!("{}@{lag}", t.name()))
                    .collect::<Vec<_>>(),
            )
            .field("date_features", &self.date_features)
            .field("num_threads", &self.num_threads)
            .field("fit", &self.fit)
            .finish()
    }
}

impl SeriesParams {
    /// Consume one named argument, unknown names are an error.
    pub fn apply(&mut self, name: &str, arg: Arg) -> Result<()> {
        match name {
            "id_col" => self.fit.id_col = string_arg(name, arg)?,
            "time_col" => self.fit.time_col = string_arg(name, arg)?,
            "target_col" => self.fit.target_col = string_arg(name, arg)?,
            "freq" => {
                self.freq = match arg {
                    Arg::Int(i) => Frequency::Int(i),
                    Arg::String(s) | Arg::Interval(s) => s
                        .parse()
                        .with_context(|| format!("Invalid frequency: {s}"))?,
                    _ => return Err(anyhow!("freq must be a string or an integer")),
                };
            }
            "lags" => self.lags = usize_list_arg(name, arg)?,
            "lag_transforms" => {
                self.lag_transforms = parse_lag_transforms(&string_arg(name, arg)?)?;
            }
            "date_features" => {
                self.date_features = list_arg(name, arg)?
                    .iter()
                    .map(|f| DateFeature::calendar(f).with_context(|| format!("Invalid date feature: {f}")))
                    .collect::<Result<_>>()?;
            }
            "num_threads" => self.num_threads = num_threads_arg(arg)?,
            "differences" => self.differences = usize_list_arg(name, arg)?,
            "scale" => self.scale = bool_arg(name, arg)?,
            "static_features" => self.fit.static_features = Some(list_arg(name, arg)?),
            "dropna" => self.fit.dropna = bool_arg(name, arg)?,
            "keep_last_n" => self.fit.keep_last_n = Some(usize_arg(name, arg)?),
            "max_horizon" => self.fit.max_horizon = Some(usize_arg(name, arg)?),
            _ => return Err(anyhow!("Unknown parameter: {}", name)),
        }
        Ok(())
    }

    pub fn time_series(&self) -> Result<TimeSeries> {
        let mut builder = TimeSeriesConfig::builder()
            .freq(self.freq.clone())
            .lags(self.lags.clone())
            .date_features(self.date_features.clone())
            .num_threads(self.num_threads);
        for (lag, transform) in &self.lag_transforms {
            builder = builder.lag_transform(*lag, transform.clone());
        }
        if !self.differences.is_empty() {
            builder = builder.target_transform(Differences::new(self.differences.clone()));
        }
        if self.scale {
            builder = builder.target_transform(LocalStandardScaler::new());
        }
        let config = builder.build().context("Failed to build series config")?;
        TimeSeries::new(config).context("Failed to create series")
    }
}
