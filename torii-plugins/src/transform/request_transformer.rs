use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// Request transformer — remove/rename/replace/add/append over request
/// headers, query string and JSON body during REWRITE.
///
/// Results are published into the context (`transformed_headers`,
/// `transformed_querystring`, `transformed_body`); the gateway applies
/// them to the outbound request. Values in add/append/replace support
/// `$(headers.x)`, `$(query.x)` and `$(consumer.x)` interpolation.
pub struct RequestTransformerPlugin;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RemoveSpec {
    headers: Vec<String>,
    querystring: Vec<String>,
    body: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MapSpec {
    headers: HashMap<String, String>,
    querystring: HashMap<String, String>,
    body: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RequestTransformerConfig {
    remove: RemoveSpec,
    rename: MapSpec,
    replace: MapSpec,
    add: MapSpec,
    append: MapSpec,
}

struct RequestTransformerInstance {
    config: RequestTransformerConfig,
    interpolation: Regex,
}

impl Plugin for RequestTransformerPlugin {
    fn name(&self) -> &'static str {
        "request-transformer"
    }

    fn priority(&self) -> i32 {
        800
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Rewrite]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: RequestTransformerConfig = serde_json::from_value(config.clone())?;
        Ok(Box::new(RequestTransformerInstance {
            config,
            interpolation: Regex::new(r"\$\(([^)]+)\)").expect("static pattern"),
        }))
    }
}

impl RequestTransformerInstance {
    fn interpolate(&self, value: &str, ctx: &PluginContext) -> String {
        self.interpolation
            .replace_all(value, |caps: &regex::Captures<'_>| {
                let reference = &caps[1];
                let Some((source, field)) = reference.split_once('.') else {
                    return String::new();
                };
                match source {
                    "headers" => ctx.request.header(field).unwrap_or("").to_string(),
                    "query" => ctx.request.query_param(field).unwrap_or("").to_string(),
                    "consumer" => ctx
                        .consumer
                        .as_ref()
                        .and_then(|c| c.get(field))
                        .map(value_to_string)
                        .unwrap_or_default(),
                    _ => String::new(),
                }
            })
            .into_owned()
    }

    fn transform_headers(&self, ctx: &mut PluginContext) {
        let mut headers: HashMap<String, String> = HashMap::new();

        'source: for (name, value) in &ctx.request.headers {
            for removed in &self.config.remove.headers {
                if removed.eq_ignore_ascii_case(name) {
                    continue 'source;
                }
            }

            let mut new_name = name.clone();
            for (old, new) in &self.config.rename.headers {
                if old.eq_ignore_ascii_case(name) {
                    new_name = new.clone();
                    break;
                }
            }

            let mut new_value = value.clone();
            for (replaced, replacement) in &self.config.replace.headers {
                if replaced.eq_ignore_ascii_case(&new_name) {
                    new_value = replacement.clone();
                    break;
                }
            }

            headers.insert(new_name, new_value);
        }

        for (name, value) in &self.config.add.headers {
            if !headers.keys().any(|k| k.eq_ignore_ascii_case(name)) {
                headers.insert(name.clone(), self.interpolate(value, ctx));
            }
        }

        for (name, value) in &self.config.append.headers {
            let interpolated = self.interpolate(value, ctx);
            match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some((_, existing)) if !existing.is_empty() => {
                    *existing = format!("{existing}, {interpolated}");
                }
                _ => {
                    headers.insert(name.clone(), interpolated);
                }
            }
        }

        let object: Map<String, Value> = headers
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        ctx.set("transformed_headers", Value::Object(object));
    }

    fn transform_querystring(&self, ctx: &mut PluginContext) {
        let mut params: HashMap<String, String> = ctx
            .request
            .query
            .split('&')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.to_string(), v.to_string()))
            })
            .collect();

        for name in &self.config.remove.querystring {
            params.remove(name);
        }

        for (old, new) in &self.config.rename.querystring {
            if let Some(value) = params.remove(old) {
                params.insert(new.clone(), value);
            }
        }

        for (name, value) in &self.config.replace.querystring {
            if params.contains_key(name) {
                params.insert(name.clone(), self.interpolate(value, ctx));
            }
        }

        for (name, value) in &self.config.add.querystring {
            if !params.contains_key(name) {
                params.insert(name.clone(), self.interpolate(value, ctx));
            }
        }

        for (name, value) in &self.config.append.querystring {
            let interpolated = self.interpolate(value, ctx);
            match params.get_mut(name) {
                Some(existing) if !existing.is_empty() => {
                    *existing = format!("{existing},{interpolated}");
                }
                _ => {
                    params.insert(name.clone(), interpolated);
                }
            }
        }

        let object: Map<String, Value> = params
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        ctx.set("transformed_querystring", Value::Object(object));
    }

    fn transform_body(&self, ctx: &mut PluginContext) {
        let is_json = ctx
            .request
            .header("content-type")
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json || ctx.request.body.is_empty() {
            return;
        }

        let Ok(Value::Object(mut data)) = serde_json::from_slice::<Value>(&ctx.request.body) else {
            return;
        };

        for name in &self.config.remove.body {
            data.remove(name);
        }

        for (old, new) in &self.config.rename.body {
            if let Some(value) = data.remove(old) {
                data.insert(new.clone(), value);
            }
        }

        for (name, value) in &self.config.replace.body {
            if data.contains_key(name) {
                data.insert(name.clone(), Value::String(self.interpolate(value, ctx)));
            }
        }

        for (name, value) in &self.config.add.body {
            if !data.contains_key(name) {
                data.insert(name.clone(), Value::String(self.interpolate(value, ctx)));
            }
        }

        for (name, value) in &self.config.append.body {
            let interpolated = self.interpolate(value, ctx);
            match data.get(name) {
                Some(existing) if !value_to_string(existing).is_empty() => {
                    let joined = format!("{}{}", value_to_string(existing), interpolated);
                    data.insert(name.clone(), Value::String(joined));
                }
                _ => {
                    data.insert(name.clone(), Value::String(interpolated));
                }
            }
        }

        ctx.set(
            "transformed_body",
            Value::String(Value::Object(data).to_string()),
        );
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PluginInstance for RequestTransformerInstance {
    fn name(&self) -> &'static str {
        "request-transformer"
    }

    fn priority(&self) -> i32 {
        800
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Rewrite]
    }

    async fn rewrite(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.transform_headers(ctx);
        self.transform_querystring(ctx);
        self.transform_body(ctx);
        Ok(())
    }
}
