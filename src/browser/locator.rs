//! Element locators.
//!
//! A `Locator` describes how to find elements the way a person reads the
//! page: by label, ARIA role and accessible name, visible text, placeholder,
//! test id, or plain CSS. Locators are resolved inside the page by a small
//! injected script, so every lookup is re-evaluated against the live DOM.

use std::fmt;

use serde::Serialize;

/// How the base set of elements is selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selector {
    Css { selector: String },
    Label { text: String, exact: bool },
    Role { role: String, name: Option<String>, exact: bool },
    Text { text: String, exact: bool },
    Placeholder { text: String },
    TestId { id: String },
}

/// A chainable element query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Locator {
    selector: Selector,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<Box<Locator>>,
}

impl Locator {
    fn new(selector: Selector) -> Self {
        Self {
            selector,
            has_text: None,
            nth: None,
            parent: None,
        }
    }

    pub fn css(selector: &str) -> Self {
        Self::new(Selector::Css {
            selector: selector.to_string(),
        })
    }

    pub fn label(text: &str) -> Self {
        Self::new(Selector::Label {
            text: text.to_string(),
            exact: false,
        })
    }

    pub fn label_exact(text: &str) -> Self {
        Self::new(Selector::Label {
            text: text.to_string(),
            exact: true,
        })
    }

    /// Any element with the given role, regardless of name.
    pub fn role(role: &str) -> Self {
        Self::new(Selector::Role {
            role: role.to_string(),
            name: None,
            exact: false,
        })
    }

    /// Role plus accessible name (substring, case-insensitive).
    pub fn role_named(role: &str, name: &str) -> Self {
        Self::new(Selector::Role {
            role: role.to_string(),
            name: Some(name.to_string()),
            exact: false,
        })
    }

    pub fn role_exact(role: &str, name: &str) -> Self {
        Self::new(Selector::Role {
            role: role.to_string(),
            name: Some(name.to_string()),
            exact: true,
        })
    }

    pub fn text(text: &str) -> Self {
        Self::new(Selector::Text {
            text: text.to_string(),
            exact: false,
        })
    }

    pub fn text_exact(text: &str) -> Self {
        Self::new(Selector::Text {
            text: text.to_string(),
            exact: true,
        })
    }

    pub fn placeholder(text: &str) -> Self {
        Self::new(Selector::Placeholder {
            text: text.to_string(),
        })
    }

    pub fn test_id(id: &str) -> Self {
        Self::new(Selector::TestId { id: id.to_string() })
    }

    /// Keep only matches whose text contains `text`.
    pub fn has_text(mut self, text: &str) -> Self {
        self.has_text = Some(text.to_string());
        self
    }

    /// Pick the n-th (zero-based) match.
    pub fn nth(mut self, index: usize) -> Self {
        self.nth = Some(index);
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    /// Resolve `child` inside every element matched by `self`.
    pub fn locate(&self, child: Locator) -> Locator {
        Locator {
            parent: Some(Box::new(self.clone())),
            ..child
        }
    }

    /// JSON form consumed by the in-page resolver.
    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain strings, bools and numbers cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent} >> ")?;
        }
        match &self.selector {
            Selector::Css { selector } => write!(f, "css={selector}")?,
            Selector::Label { text, exact } => write!(f, "label={text:?}{}", exact_suffix(*exact))?,
            Selector::Role { role, name, exact } => {
                write!(f, "role={role}")?;
                if let Some(name) = name {
                    write!(f, "[name={name:?}{}]", exact_suffix(*exact))?;
                }
            }
            Selector::Text { text, exact } => write!(f, "text={text:?}{}", exact_suffix(*exact))?,
            Selector::Placeholder { text } => write!(f, "placeholder={text:?}")?,
            Selector::TestId { id } => write!(f, "test-id={id}")?,
        }
        if let Some(text) = &self.has_text {
            write!(f, " has-text={text:?}")?;
        }
        if let Some(n) = self.nth {
            write!(f, " nth={n}")?;
        }
        Ok(())
    }
}

fn exact_suffix(exact: bool) -> &'static str {
    if exact {
        "s"
    } else {
        "i"
    }
}

/// In-page resolver and element operations.
///
/// Called as `(RESOLVER)(query, op, arg)`; always returns
/// `{ ok: true, value }` or `{ ok: false, error }`.
pub const RESOLVER_JS: &str = r#"
function (query, op, arg) {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const textMatches = (value, wanted, exact) => exact
    ? norm(value) === norm(wanted)
    : norm(value).toLowerCase().includes(norm(wanted).toLowerCase());
  const visible = (el) => {
    if (!el || !el.isConnected) return false;
    const style = getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  };
  const byId = (id) => (id ? document.getElementById(id) : null);
  const labelsOf = (el) => {
    const out = [];
    if (el.getAttribute('aria-label')) out.push(el.getAttribute('aria-label'));
    const lb = el.getAttribute('aria-labelledby');
    if (lb) out.push(lb.split(/\s+/).map((id) => (byId(id) || {}).textContent || '').join(' '));
    if (el.labels) for (const l of el.labels) out.push(l.textContent);
    return out;
  };
  const roleOf = (el) => {
    const explicit = el.getAttribute('role');
    if (explicit) return explicit.split(/\s+/)[0];
    const tag = el.tagName.toLowerCase();
    if (tag === 'button') return 'button';
    if (tag === 'a' && el.hasAttribute('href')) return 'link';
    if (/^h[1-6]$/.test(tag)) return 'heading';
    if (tag === 'option') return 'option';
    if (tag === 'select') return 'combobox';
    if (tag === 'tr') return 'row';
    if (tag === 'textarea') return 'textbox';
    if (tag === 'input') {
      const type = (el.getAttribute('type') || 'text').toLowerCase();
      if (['button', 'submit', 'reset'].includes(type)) return 'button';
      if (type === 'checkbox') return 'checkbox';
      if (type === 'radio') return 'radio';
      return 'textbox';
    }
    return null;
  };
  const nameOf = (el) => {
    const labels = labelsOf(el).filter((l) => norm(l));
    if (labels.length) return labels[0];
    if (el.tagName.toLowerCase() === 'input') return el.value || el.getAttribute('placeholder') || el.title || '';
    return el.innerText || el.textContent || el.title || '';
  };
  const ownTextMatch = (el, text, exact) => {
    if (!textMatches(el.innerText || el.textContent, text, exact)) return false;
    for (const child of el.children) {
      if (textMatches(child.innerText || child.textContent, text, exact)) return false;
    }
    return true;
  };
  const resolveIn = (s, scope) => {
    const all = Array.from(scope.querySelectorAll('*'));
    const sel = s.selector;
    switch (sel.type) {
      case 'css':
        return Array.from(scope.querySelectorAll(sel.selector));
      case 'label': {
        const out = [];
        for (const el of all) {
          if (el.tagName.toLowerCase() === 'label') continue;
          if (labelsOf(el).some((l) => textMatches(l, sel.text, sel.exact))) out.push(el);
        }
        return out;
      }
      case 'role':
        return all.filter((el) => roleOf(el) === sel.role
          && (sel.name == null || textMatches(nameOf(el), sel.name, sel.exact)));
      case 'text':
        return all.filter((el) => !['SCRIPT', 'STYLE', 'HEAD'].includes(el.tagName)
          && ownTextMatch(el, sel.text, sel.exact));
      case 'placeholder':
        return all.filter((el) => textMatches(el.getAttribute('placeholder'), sel.text, false));
      case 'test_id':
        return Array.from(scope.querySelectorAll('[data-testid="' + CSS.escape(sel.id) + '"]'));
    }
    return [];
  };
  const resolve = (s) => {
    const scopes = s.parent ? resolve(s.parent) : [document];
    let found = [];
    for (const scope of scopes) {
      for (const el of resolveIn(s, scope)) if (!found.includes(el)) found.push(el);
    }
    if (s.has_text != null) found = found.filter((el) => textMatches(el.innerText || el.textContent, s.has_text, false));
    if (s.nth != null) found = found.length > s.nth ? [found[s.nth]] : [];
    return found;
  };
  const control = (el) => {
    if (el.control) return el.control;
    if (['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName)) return el;
    return el.querySelector('input, textarea, select') || el;
  };
  const setValue = (el, value) => {
    const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype
      : el.tagName === 'SELECT' ? HTMLSelectElement.prototype : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
    setter.call(el, value);
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
  };

  const found = resolve(query);
  if (op === 'count') return { ok: true, value: found.length };
  if (op === 'visible') return { ok: true, value: found.length > 0 && visible(found[0]) };
  if (op === 'hidden') return { ok: true, value: !found.some(visible) };
  if (found.length === 0) return { ok: false, error: 'not_found' };
  const el = found[0];
  switch (op) {
    case 'click':
      el.scrollIntoView({ block: 'center' });
      el.click();
      return { ok: true, value: null };
    case 'focus':
      control(el).focus();
      return { ok: true, value: null };
    case 'fill': {
      const target = control(el);
      target.focus();
      setValue(target, arg);
      return { ok: true, value: null };
    }
    case 'check': {
      const box = control(el);
      if (!box.checked) (el.tagName === 'LABEL' ? el : box).click();
      return { ok: true, value: !!control(el).checked };
    }
    case 'checked':
      return { ok: true, value: !!control(el).checked };
    case 'inner_text':
      return { ok: true, value: el.innerText };
    case 'text_content':
      return { ok: true, value: el.textContent };
    case 'attribute':
      return { ok: true, value: el.getAttribute(arg) };
    case 'options': {
      const select = control(el);
      return { ok: true, value: Array.from(select.options || []).map((o) => ({ value: o.value, text: o.innerText || o.textContent })) };
    }
    case 'select': {
      const select = control(el);
      const opt = Array.from(select.options || []).find((o) => o.value === arg || norm(o.textContent) === norm(arg));
      if (!opt) return { ok: false, error: 'option_not_found' };
      setValue(select, opt.value);
      return { ok: true, value: opt.value };
    }
  }
  return { ok: false, error: 'unknown_op' };
}
"#;

/// Build the expression that runs `op` against `locator` in the page.
pub fn build_locator_expression(locator: &Locator, op: &str, arg: &serde_json::Value) -> String {
    format!(
        "({RESOLVER_JS})({}, {}, {})",
        locator.to_json(),
        serde_json::Value::String(op.to_string()),
        arg
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_locator_json() {
        let loc = Locator::role_exact("button", "Log in");
        let json = loc.to_json();
        assert_eq!(json["selector"]["type"], "role");
        assert_eq!(json["selector"]["role"], "button");
        assert_eq!(json["selector"]["name"], "Log in");
        assert_eq!(json["selector"]["exact"], true);
        assert!(json.get("nth").is_none());
    }

    #[test]
    fn test_filters_and_nesting() {
        let loc = Locator::label("Error")
            .locate(Locator::css("div").has_text("critical").nth(2));
        let json = loc.to_json();
        assert_eq!(json["selector"]["selector"], "div");
        assert_eq!(json["has_text"], "critical");
        assert_eq!(json["nth"], 2);
        assert_eq!(json["parent"]["selector"]["type"], "label");
        assert_eq!(json["parent"]["selector"]["text"], "Error");
    }

    #[test]
    fn test_test_id_json() {
        let json = Locator::test_id("ap143528-account-customize-open-button").to_json();
        assert_eq!(json["selector"]["type"], "test_id");
        assert_eq!(json["selector"]["id"], "ap143528-account-customize-open-button");
    }

    #[test]
    fn test_display() {
        let loc = Locator::role_named("heading", "Select an account").first();
        assert_eq!(loc.to_string(), "role=heading[name=\"Select an account\"i] nth=0");

        let nested = Locator::role_named("row", "Jan 2024").locate(Locator::label("download statement"));
        assert!(nested.to_string().starts_with("role=row"));
        assert!(nested.to_string().contains(">> label=\"download statement\"i"));
    }

    #[test]
    fn test_expression_embeds_spec_and_op() {
        let expr = build_locator_expression(
            &Locator::placeholder("XXXXXX"),
            "fill",
            &serde_json::json!("123456"),
        );
        assert!(expr.starts_with("("));
        assert!(expr.contains("\"placeholder\""));
        assert!(expr.contains("\"fill\""));
        assert!(expr.ends_with("\"123456\")"));
    }

    #[test]
    fn test_quotes_are_escaped() {
        let expr = build_locator_expression(
            &Locator::css(".pvd-inline-alert__content font[color=\"red\"]"),
            "text_content",
            &serde_json::Value::Null,
        );
        assert!(expr.contains(r#"font[color=\"red\"]"#));
    }
}
