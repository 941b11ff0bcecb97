//! Prompt composition: renders a loop's base prompt through minijinja,
//! injecting the loop's key/value context and current work-state pointer
//! as template variables (`spec.md` §4.10 "Prompt composition", grounded
//! in `sc-composer`'s minijinja-based templating).

use minijinja::{context, Environment};
use serde_json::Value;

/// Render `base_prompt` against `kv` and `work_state`. A base prompt with
/// no `{{ }}` placeholders renders unchanged, so templating stays
/// opt-in per loop. Any template error (unknown filter, unterminated
/// tag, missing variable) falls back to the literal base prompt rather
/// than failing the iteration outright — a broken template shouldn't
/// stall a running loop.
pub fn build_prompt(base_prompt: &str, kv: &[(String, String)], work_state: Option<&Value>) -> String {
    let mut env = Environment::new();
    if env.add_template("base", base_prompt).is_err() {
        return base_prompt.to_string();
    }
    let kv_map: std::collections::BTreeMap<&str, &str> =
        kv.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let work_state = work_state.cloned().unwrap_or(Value::Null);
    let ctx = context! { kv => kv_map, work_state => work_state };

    let Ok(tmpl) = env.get_template("base") else {
        return base_prompt.to_string();
    };
    tmpl.render(ctx).unwrap_or_else(|_| base_prompt.to_string())
}
