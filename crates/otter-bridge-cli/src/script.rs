//! Line-oriented demo bundles driven by the loopback executor.
//!
//! Each non-empty line is one statement:
//!
//! ```text
//! # comment
//! Storage.setItem ["greeting", "hello"]
//! Storage.getItem ["greeting", "$promise"]
//! = DeviceInfo.pixelRatio
//! @app
//! DeviceInfo.getName ["$callback"]
//! ```
//!
//! Arguments are a JSON array. `"$callback"` passes a callback that logs its
//! reply through `Logger.log`; `"$promise"` passes a resolve/reject pair. A
//! leading `=` makes a sync call and logs the returned value. Statements after
//! `@app` run when `AppRegistry.runApplication` is called.

use otter_bridge::prelude::*;
use otter_bridge::ScriptError;
use thiserror::Error;
use tracing::{debug, trace};

/// Error raised while parsing a bundle
#[derive(Error, Debug, PartialEq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Value(Value),
    Callback,
    Promise,
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    line: usize,
    module: String,
    method: String,
    args: Vec<Arg>,
    sync: bool,
}

impl Statement {
    fn label(&self) -> String {
        format!("{}.{}", self.module, self.method)
    }

    fn run(&self, scope: &mut ScriptScope<'_>) -> Result<(), ScriptError> {
        trace!(line = self.line, call = %self.label(), "Bundle statement");
        let mut args = Vec::with_capacity(self.args.len() + 1);
        for arg in &self.args {
            match arg {
                Arg::Value(v) => args.push(v.clone()),
                Arg::Callback => args.push(reply_logger(scope, self.label())),
                Arg::Promise => {
                    args.push(reply_logger(scope, format!("{} resolved", self.label())));
                    args.push(reply_logger(scope, format!("{} rejected", self.label())));
                }
            }
        }

        if self.sync {
            let result = scope.call_sync(&self.module, &self.method, args)?;
            let json = result.to_json().map_err(|e| ScriptError::Evaluation(e.to_string()))?;
            let line = format!("{} = {}", self.label(), json);
            return scope.call_native("Logger", "log", vec![Value::from(line)]);
        }
        scope.call_native(&self.module, &self.method, args)
    }
}

fn reply_logger(scope: &mut ScriptScope<'_>, label: String) -> Value {
    scope.callback(move |scope, args| {
        let rendered = args
            .iter()
            .map(|a| a.to_json().map(|json| json.to_string()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ScriptError::Evaluation(e.to_string()))?;
        let line = format!("{label} <- [{}]", rendered.join(", "));
        scope.call_native("Logger", "log", vec![Value::from(line)])
    })
}

/// A parsed bundle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    load: Vec<Statement>,
    app: Vec<Statement>,
}

impl Bundle {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut bundle = Bundle::default();
        let mut in_app = false;

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            if text == "@app" {
                if in_app {
                    return Err(ParseError {
                        line,
                        message: "duplicate @app section".to_string(),
                    });
                }
                in_app = true;
                continue;
            }

            let statement = parse_statement(line, text)?;
            if in_app {
                bundle.app.push(statement);
            } else {
                bundle.load.push(statement);
            }
        }

        Ok(bundle)
    }

    pub fn len(&self) -> usize {
        self.load.len() + self.app.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build an executor that runs the load section on `run_script` and the
    /// app section on `AppRegistry.runApplication`.
    pub fn into_executor(self) -> LoopbackExecutor {
        let Bundle { load, app } = self;

        LoopbackExecutor::new()
            .on_load(move |scope, _source| {
                debug!(statements = load.len(), "Running bundle load section");
                load.iter().try_for_each(|s| s.run(scope))
            })
            .function("AppRegistry", "runApplication", move |scope, args| {
                let key = args.first().and_then(Value::as_str).unwrap_or("unknown");
                let line = format!("Running application {key}");
                scope.call_native("Logger", "log", vec![Value::from(line)])?;
                app.iter().try_for_each(|s| s.run(scope))
            })
    }
}

fn parse_statement(line: usize, text: &str) -> Result<Statement, ParseError> {
    let error = |message: String| ParseError { line, message };

    let (sync, text) = match text.strip_prefix('=') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };
    let (target, rest) = match text.split_once(char::is_whitespace) {
        Some((target, rest)) => (target, rest.trim()),
        None => (text, ""),
    };
    let (module, method) = target
        .split_once('.')
        .filter(|(m, f)| !m.is_empty() && !f.is_empty())
        .ok_or_else(|| error(format!("expected Module.method, found '{target}'")))?;

    let args = if rest.is_empty() {
        Vec::new()
    } else {
        let parsed: Vec<serde_json::Value> = serde_json::from_str(rest)
            .map_err(|e| error(format!("arguments must be a JSON array: {e}")))?;
        parsed
            .into_iter()
            .map(|arg| match arg.as_str() {
                Some("$callback") => Arg::Callback,
                Some("$promise") => Arg::Promise,
                _ => Arg::Value(Value::from(arg)),
            })
            .collect()
    };

    if sync && args.iter().any(|a| !matches!(a, Arg::Value(_))) {
        return Err(error("sync calls cannot take callbacks".to_string()));
    }

    Ok(Statement {
        line,
        module: module.to_string(),
        method: method.to_string(),
        args,
        sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let bundle = Bundle::parse(
            "# setup\nStorage.setItem [\"a\", \"1\"]\n\n@app\nDeviceInfo.getName [\"$callback\"]\n",
        )
        .unwrap();
        assert_eq!(bundle.load.len(), 1);
        assert_eq!(bundle.app.len(), 1);
        assert_eq!(bundle.load[0].line, 2);
        assert_eq!(
            bundle.load[0].args,
            vec![Arg::Value(Value::from("a")), Arg::Value(Value::from("1"))]
        );
        assert_eq!(bundle.app[0].args, vec![Arg::Callback]);
    }

    #[test]
    fn test_demo_bundle_parses() {
        let source = include_str!("../demo/hello.bundle");
        let bundle = Bundle::parse(source).unwrap();
        assert_eq!(bundle.load.len(), 3);
        assert_eq!(bundle.app.len(), 3);
        assert!(bundle.load[2].sync);
    }

    #[test]
    fn test_parse_sync_call() {
        let bundle = Bundle::parse("= DeviceInfo.pixelRatio").unwrap();
        let statement = &bundle.load[0];
        assert!(statement.sync);
        assert_eq!(statement.label(), "DeviceInfo.pixelRatio");
        assert!(statement.args.is_empty());
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = Bundle::parse("Logger.log [\"ok\"]\nnot-a-call").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().starts_with("line 2:"));

        let err = Bundle::parse("Logger.log {\"a\": 1}").unwrap_err();
        assert!(err.message.contains("JSON array"));

        let err = Bundle::parse("= Storage.getItem [\"k\", \"$promise\"]").unwrap_err();
        assert!(err.message.contains("sync"));

        let err = Bundle::parse("@app\n@app").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_load_section_queues_calls() {
        let bundle = Bundle::parse("Logger.log [\"hi\"]\nStorage.getItem [\"k\", \"$promise\"]").unwrap();
        let mut executor = bundle.into_executor();
        let config = r#"{"remoteModuleConfig":{
            "Logger":{"moduleID":0,"methods":{"log":{"methodID":0,"type":"async"}}},
            "Storage":{"moduleID":1,"methods":{"getItem":{"methodID":0,"type":"promise"}}}
        }}"#;
        executor
            .set_global_variable(otter_bridge::executor::MODULE_CONFIG_GLOBAL, config)
            .unwrap();

        struct NoHooks;
        impl otter_bridge::executor::NativeHooks for NoHooks {
            fn call_sync(&self, _: u32, _: u32, _: Vec<Value>) -> BridgeResult<Value> {
                Err(BridgeError::illegal_state("no sync methods"))
            }
        }

        let batch = executor.load_script("", "demo.bundle", &NoHooks).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.calls[1].module_id, 1);
        assert_eq!(batch.calls[1].args.len(), 3);
    }
}
