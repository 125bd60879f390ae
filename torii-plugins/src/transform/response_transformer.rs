use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

const BUFFER_KEY: &str = "response_transformer.buffer";

/// Response transformer — header edits in HEADER_FILTER, JSON body
/// edits in BODY_FILTER.
///
/// JSON edits need the whole document: chunks accumulate in a
/// per-request buffer (kept in the context, since instances are shared
/// across requests) and the filter emits empty chunks until the
/// buffered body parses.
pub struct ResponseTransformerPlugin;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RemoveSpec {
    headers: Vec<String>,
    json: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HeaderMapSpec {
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MapSpec {
    headers: HashMap<String, String>,
    json: HashMap<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseTransformerConfig {
    remove: RemoveSpec,
    rename: HeaderMapSpec,
    replace: MapSpec,
    add: MapSpec,
    append: MapSpec,
}

struct ResponseTransformerInstance {
    config: ResponseTransformerConfig,
}

impl Plugin for ResponseTransformerPlugin {
    fn name(&self) -> &'static str {
        "response-transformer"
    }

    fn priority(&self) -> i32 {
        700
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::HeaderFilter, Phase::BodyFilter]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: ResponseTransformerConfig = serde_json::from_value(config.clone())?;
        Ok(Box::new(ResponseTransformerInstance { config }))
    }
}

impl ResponseTransformerInstance {
    fn has_json_ops(&self) -> bool {
        !self.config.remove.json.is_empty()
            || !self.config.replace.json.is_empty()
            || !self.config.add.json.is_empty()
            || !self.config.append.json.is_empty()
    }

    fn apply_json_ops(&self, data: &mut serde_json::Map<String, Value>) {
        for name in &self.config.remove.json {
            data.remove(name);
        }

        for (name, value) in &self.config.replace.json {
            if data.contains_key(name) {
                data.insert(name.clone(), value.clone());
            }
        }

        for (name, value) in &self.config.add.json {
            if !data.contains_key(name) {
                data.insert(name.clone(), value.clone());
            }
        }

        for (name, value) in &self.config.append.json {
            match data.get(name) {
                Some(Value::String(existing)) => {
                    let appended = match value {
                        Value::String(s) => format!("{existing}{s}"),
                        other => format!("{existing}{other}"),
                    };
                    data.insert(name.clone(), Value::String(appended));
                }
                Some(Value::Array(existing)) => {
                    let mut extended = existing.clone();
                    extended.push(value.clone());
                    data.insert(name.clone(), Value::Array(extended));
                }
                Some(_) => {}
                None => {
                    data.insert(name.clone(), value.clone());
                }
            }
        }
    }
}

#[async_trait]
impl PluginInstance for ResponseTransformerInstance {
    fn name(&self) -> &'static str {
        "response-transformer"
    }

    fn priority(&self) -> i32 {
        700
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::HeaderFilter, Phase::BodyFilter]
    }

    async fn header_filter(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let Some(response) = ctx.response.as_mut() else {
            return Ok(());
        };

        for name in &self.config.remove.headers {
            response.remove_header(name);
        }

        for (old, new) in &self.config.rename.headers {
            if let Some(value) = response.header(old).map(|v| v.to_string()) {
                response.remove_header(old);
                response.set_header(new, value);
            }
        }

        for (name, value) in &self.config.replace.headers {
            if response.header(name).is_some() {
                response.set_header(name, value.clone());
            }
        }

        for (name, value) in &self.config.add.headers {
            if response.header(name).is_none() {
                response.set_header(name, value.clone());
            }
        }

        for (name, value) in &self.config.append.headers {
            match response.header(name).map(|v| v.to_string()) {
                Some(existing) => response.set_header(name, format!("{existing}, {value}")),
                None => response.set_header(name, value.clone()),
            }
        }

        Ok(())
    }

    async fn body_filter(&self, ctx: &mut PluginContext, chunk: Bytes) -> Result<Bytes, PluginError> {
        if !self.has_json_ops() {
            return Ok(chunk);
        }

        let is_json = ctx
            .response
            .as_ref()
            .and_then(|r| r.header("content-type"))
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            return Ok(chunk);
        }

        let mut buffer = ctx
            .get_str(BUFFER_KEY)
            .and_then(|encoded| BASE64.decode(encoded).ok())
            .unwrap_or_default();
        buffer.extend_from_slice(&chunk);

        let mut data: Value = match serde_json::from_slice(&buffer) {
            Ok(data) => data,
            Err(_) => {
                // incomplete document; hold the chunk back
                ctx.set(BUFFER_KEY, Value::String(BASE64.encode(&buffer)));
                return Ok(Bytes::new());
            }
        };

        if let Value::Object(ref mut map) = data {
            self.apply_json_ops(map);
        }

        ctx.remove(BUFFER_KEY);
        Ok(Bytes::from(data.to_string()))
    }
}
