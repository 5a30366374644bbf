//! The loader plug-in surface: how decoded values are handed to time-series
//! stores.
//!
//! Loaders are looked up by name in a registration table populated at
//! program start; the decode pipeline only ever sees the [`ShefLoader`]
//! trait. Values are pushed one at a time; whenever the loader-defined
//! series name changes, the pipeline signals the end of the previous series
//! with [`ShefLoader::load_time_series`], and [`ShefLoader::done`] is called
//! exactly once at the end of the run.

use std::collections::HashMap;
use std::io::Write;
use std::str::FromStr;

use crate::emitter::{emit, EmitFormat};
use crate::value::ShefValue;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("no loader named '{0}' is registered")]
    UnknownLoader(String),
    #[error("bad loader option: {0}")]
    BadOption(String),
    #[error("loader '{0}' cannot synthesize SHEF text from its store")]
    UnloadUnsupported(String),
    #[error("loader I/O failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for LoaderError {
    fn from(e: std::io::Error) -> Self {
        LoaderError::Io(e.to_string())
    }
}

pub trait ShefLoader {
    fn name(&self) -> &str;

    /// Whether this loader can run in the reverse direction and synthesize
    /// SHEF text from its store.
    fn can_unload(&self) -> bool {
        false
    }

    /// The series identity of a value. A change of identity between
    /// consecutive pushed values ends the series being accumulated.
    fn time_series_name(&self, value: &ShefValue) -> String;

    fn set_shef_value(&mut self, value: &ShefValue) -> Result<(), LoaderError>;

    /// The series accumulated so far is complete; persist it.
    fn load_time_series(&mut self) -> Result<(), LoaderError>;

    /// Reverse direction: write SHEF text for the store's contents.
    fn unload(&mut self) -> Result<(), LoaderError> {
        Err(LoaderError::UnloadUnsupported(self.name().to_string()))
    }

    /// Called exactly once when the run is over.
    fn done(&mut self) -> Result<(), LoaderError>;
}

/// A `--loader` argument: a name followed by square-bracketed options,
/// e.g. `text[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSpec {
    pub name: String,
    pub options: Vec<String>,
}

impl FromStr for LoaderSpec {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, mut rest) = match s.find('[') {
            None => (s.to_string(), ""),
            Some(i) => (s[..i].to_string(), &s[i..]),
        };
        if name.is_empty() {
            return Err(LoaderError::BadOption(format!(
                "'{s}' has no loader name"
            )));
        }
        let mut options = Vec::new();
        while !rest.is_empty() {
            let Some(stripped) = rest.strip_prefix('[') else {
                return Err(LoaderError::BadOption(format!(
                    "unexpected text '{rest}' after loader options"
                )));
            };
            let Some(end) = stripped.find(']') else {
                return Err(LoaderError::BadOption(format!(
                    "unclosed option bracket in '{s}'"
                )));
            };
            options.push(stripped[..end].to_string());
            rest = &stripped[end + 1..];
        }
        Ok(LoaderSpec { name, options })
    }
}

/// What the host hands a loader at construction time (the logger is the
/// global `log` facade).
pub struct LoaderContext {
    pub out: Box<dyn Write>,
    pub append: bool,
}

pub type LoaderFactory = fn(&LoaderSpec, LoaderContext) -> Result<Box<dyn ShefLoader>, LoaderError>;

/// The name-to-factory table populated at program start.
pub struct LoaderRegistry {
    table: HashMap<String, LoaderFactory>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = LoaderRegistry {
            table: HashMap::new(),
        };
        registry.register("text", TextLoader::create);
        registry
    }
}

impl LoaderRegistry {
    pub fn register(&mut self, name: &str, factory: LoaderFactory) {
        self.table.insert(name.to_string(), factory);
    }

    pub fn create(
        &self,
        spec: &LoaderSpec,
        ctx: LoaderContext,
    ) -> Result<Box<dyn ShefLoader>, LoaderError> {
        let factory = self
            .table
            .get(&spec.name)
            .ok_or_else(|| LoaderError::UnknownLoader(spec.name.clone()))?;
        factory(spec, ctx)
    }
}

/// Push a value stream through a loader, signalling series breaks and
/// completion per the loader contract.
pub fn drive(
    loader: &mut dyn ShefLoader,
    values: impl IntoIterator<Item = ShefValue>,
) -> Result<(), LoaderError> {
    let mut previous: Option<String> = None;
    for v in values {
        let name = loader.time_series_name(&v);
        if previous.as_ref().is_some_and(|p| p != &name) {
            loader.load_time_series()?;
        }
        loader.set_shef_value(&v)?;
        previous = Some(name);
    }
    if previous.is_some() {
        loader.load_time_series()?;
    }
    loader.done()
}

/// The built-in loader: formats every value through the emitter onto the
/// output sink. Takes one optional bracket option selecting the format
/// (`[1]` long, `[2]` compact).
pub struct TextLoader {
    format: EmitFormat,
    out: Box<dyn Write>,
}

impl TextLoader {
    pub fn create(spec: &LoaderSpec, ctx: LoaderContext) -> Result<Box<dyn ShefLoader>, LoaderError> {
        let format = match spec.options.first().map(|s| s.as_str()) {
            None => EmitFormat::Long,
            Some("1") => EmitFormat::Long,
            Some("2") => EmitFormat::Compact,
            Some(other) => {
                return Err(LoaderError::BadOption(format!(
                    "'{other}' is not an emit format (expected 1 or 2)"
                )))
            }
        };
        if let Some(extra) = spec.options.get(1) {
            return Err(LoaderError::BadOption(format!(
                "unexpected option '{extra}'"
            )));
        }
        Ok(Box::new(TextLoader {
            format,
            out: ctx.out,
        }))
    }
}

impl ShefLoader for TextLoader {
    fn name(&self) -> &str {
        "text"
    }

    fn time_series_name(&self, value: &ShefValue) -> String {
        format!("{}.{}", value.location, value.parameter_code)
    }

    fn set_shef_value(&mut self, value: &ShefValue) -> Result<(), LoaderError> {
        writeln!(self.out, "{}", emit(value, self.format))?;
        Ok(())
    }

    fn load_time_series(&mut self) -> Result<(), LoaderError> {
        self.out.flush()?;
        Ok(())
    }

    fn done(&mut self) -> Result<(), LoaderError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeOptions, Decoder};
    use crate::registry::ParamRegistry;
    use crate::shef_time::TimeMode;
    use crate::tokenizer::Tokenizer;
    use chrono::NaiveDate;

    fn decode(input: &str) -> Vec<ShefValue> {
        let registry = ParamRegistry::default();
        let opts = DecodeOptions {
            strict: false,
            time_mode: TimeMode::Modern,
            today: NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(),
        };
        let mut decoder = Decoder::new(&registry, opts);
        let mut values = Vec::new();
        for rec in Tokenizer::new(input.as_bytes()) {
            values.extend(decoder.decode_message(&rec.unwrap()).values);
        }
        values
    }

    #[test]
    fn loader_spec_parsing() {
        assert_eq!(
            "text".parse::<LoaderSpec>().unwrap(),
            LoaderSpec {
                name: "text".to_string(),
                options: vec![]
            }
        );
        assert_eq!(
            "cwms[db1][snap]".parse::<LoaderSpec>().unwrap(),
            LoaderSpec {
                name: "cwms".to_string(),
                options: vec!["db1".to_string(), "snap".to_string()]
            }
        );
        assert!("[1]".parse::<LoaderSpec>().is_err());
        assert!("text[1".parse::<LoaderSpec>().is_err());
    }

    #[derive(Default)]
    struct Recording {
        events: Vec<String>,
    }

    impl ShefLoader for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        fn time_series_name(&self, value: &ShefValue) -> String {
            format!("{}.{}", value.location, value.parameter_code)
        }
        fn set_shef_value(&mut self, value: &ShefValue) -> Result<(), LoaderError> {
            self.events.push(format!("value {}", value.pe()));
            Ok(())
        }
        fn load_time_series(&mut self) -> Result<(), LoaderError> {
            self.events.push("series".to_string());
            Ok(())
        }
        fn done(&mut self) -> Result<(), LoaderError> {
            self.events.push("done".to_string());
            Ok(())
        }
    }

    #[test]
    fn drive_signals_series_breaks_and_done_once() {
        let values = decode(".A TNSO2 20240630 Z DH06/PC 1.0/PC 2.0/TA 70.0\n");
        let mut loader = Recording::default();
        drive(&mut loader, values).unwrap();
        assert_eq!(
            loader.events,
            vec!["value PC", "value PC", "series", "value TA", "series", "done"]
        );
    }

    #[test]
    fn drive_on_empty_input_still_finishes() {
        let mut loader = Recording::default();
        drive(&mut loader, Vec::new()).unwrap();
        assert_eq!(loader.events, vec!["done"]);
    }

    #[test]
    fn unload_is_rejected_by_default() {
        let mut loader = Recording::default();
        assert!(matches!(
            loader.unload(),
            Err(LoaderError::UnloadUnsupported(_))
        ));
        assert!(!loader.can_unload());
    }

    #[test]
    fn registry_builds_the_text_loader() {
        let registry = LoaderRegistry::default();
        let spec: LoaderSpec = "text[2]".parse().unwrap();
        let ctx = LoaderContext {
            out: Box::new(Vec::new()),
            append: false,
        };
        let loader = registry.create(&spec, ctx).unwrap();
        assert_eq!(loader.name(), "text");
        assert!(!loader.can_unload());

        let missing: LoaderSpec = "cwms".parse().unwrap();
        let ctx = LoaderContext {
            out: Box::new(Vec::new()),
            append: false,
        };
        assert!(matches!(
            registry.create(&missing, ctx),
            Err(LoaderError::UnknownLoader(_))
        ));
    }
}
