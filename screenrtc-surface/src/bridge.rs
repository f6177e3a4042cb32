//! Page-side half of the scripting bridge
//!
//! Chrome exposes a single DevTools binding to the page. Every bound host
//! function is a small wrapper around it that sends `{name, seq, args}` as a
//! JSON string. Request-style wrappers return a promise that the host later
//! settles by evaluating [`settle_expression`] with the same `seq`.

use screenrtc_core::ScreenRtcError;
use serde::Deserialize;
use serde_json::Value;

/// Name of the DevTools binding all wrappers call through
pub const BINDING_NAME: &str = "__screenrtcBinding";

const BOOTSTRAP: &str = r#"(function () {
  if (window.__screenrtc) return;
  var pending = new Map();
  var lastSeq = 0;
  window.__screenrtc = {
    call: function (name, args, expectReply) {
      if (!expectReply) {
        window.__screenrtcBinding(JSON.stringify({ name: name, seq: 0, args: args }));
        return undefined;
      }
      var seq = ++lastSeq;
      return new Promise(function (resolve, reject) {
        pending.set(seq, { resolve: resolve, reject: reject });
        window.__screenrtcBinding(JSON.stringify({ name: name, seq: seq, args: args }));
      });
    },
    settle: function (seq, result, error) {
      var entry = pending.get(seq);
      if (!entry) return;
      pending.delete(seq);
      if (error !== null) entry.reject(new Error(error));
      else entry.resolve(result);
    }
  };
})();
"#;

/// How a bound function talks back to the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Fire-and-forget, returns `undefined`
    Notify,
    /// Returns a promise settled by the host
    Request,
}

/// A decoded call from the page
#[derive(Debug, Clone, Deserialize)]
pub struct BindingCall {
    /// Bound function name
    pub name: String,
    /// Promise sequence number; zero for notifications
    pub seq: u64,
    /// Call arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

impl BindingCall {
    /// Decode the payload of a `Runtime.bindingCalled` event
    pub fn parse(payload: &str) -> Result<Self, ScreenRtcError> {
        serde_json::from_str(payload).map_err(|source| ScreenRtcError::InvalidMessage {
            message: payload.to_string(),
            source,
        })
    }

    /// First argument, or `null` when the page passed none
    pub fn first_arg(&self) -> Value {
        self.args.first().cloned().unwrap_or(Value::Null)
    }

    /// First argument as text; non-string values are rendered as JSON
    pub fn first_arg_text(&self) -> String {
        match self.args.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Reject names that cannot be assigned as a plain global function
pub fn validate_name(name: &str) -> Result<(), ScreenRtcError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if valid_start && valid_rest && name != BINDING_NAME {
        Ok(())
    } else {
        Err(ScreenRtcError::BridgeRegistration {
            name: name.to_string(),
            reason: "not a valid function name".to_string(),
        })
    }
}

/// Script defining the wrapper for `name`, safe to run more than once
pub fn binding_script(name: &str, kind: BindingKind) -> String {
    let literal = Value::String(name.to_string()).to_string();
    let expect_reply = kind == BindingKind::Request;
    format!(
        "{BOOTSTRAP}window[{literal}] = function () {{ return window.__screenrtc.call({literal}, Array.prototype.slice.call(arguments), {expect_reply}); }};\n"
    )
}

/// Expression settling the page promise for `seq`
pub fn settle_expression(seq: u64, outcome: &Result<Value, String>) -> String {
    match outcome {
        Ok(value) => format!("window.__screenrtc.settle({}, {}, null)", seq, value),
        Err(message) => format!(
            "window.__screenrtc.settle({}, null, {})",
            seq,
            Value::String(message.clone())
        ),
    }
}
