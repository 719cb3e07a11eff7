//! Template parsing and substitution on top of minijinja.

use std::collections::BTreeSet;

use minijinja::{Environment, UndefinedBehavior};

use super::BootstrapContext;
use crate::errors::{VmhostError, VmhostResult};

const TEMPLATE_NAME: &str = "bootstrap";

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

/// Parse `source` and return the variables it reads but never defines.
///
/// Names the environment already provides (`range`, `dict`, ...) are
/// not free variables and are left out.
pub(crate) fn undeclared_variables(source: &str) -> VmhostResult<BTreeSet<String>> {
    let env = environment();
    let template = env
        .template_from_named_str(TEMPLATE_NAME, source)
        .map_err(template_error)?;
    let globals: BTreeSet<&str> = env.globals().map(|(name, _)| name).collect();
    Ok(template
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !globals.contains(name.as_str()))
        .collect())
}

/// Substitute `context` into `source`. Any undefined lookup is an error.
pub(crate) fn render(source: &str, context: &BootstrapContext) -> VmhostResult<String> {
    let env = environment();
    let template = env
        .template_from_named_str(TEMPLATE_NAME, source)
        .map_err(template_error)?;
    template.render(context).map_err(template_error)
}

fn template_error(err: minijinja::Error) -> VmhostError {
    VmhostError::Template(match err.line() {
        Some(line) => format!("{} (line {})", err, line),
        None => err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_undeclared_excludes_locally_set_names() {
        let keys = undeclared_variables(
            "{% set port = 22 %}host: {{ hostname }}:{{ port }}\n{% for k in ssh_keys %}- {{ k }}\n{% endfor %}",
        )
        .unwrap();
        assert_eq!(
            keys,
            BTreeSet::from(["hostname".to_string(), "ssh_keys".to_string()])
        );
    }

    #[test]
    fn test_builtin_globals_are_not_required() {
        let source = "{% for i in range(2) %}{{ loop.index }}: {{ name }}\n{% endfor %}";
        let keys = undeclared_variables(source).unwrap();
        assert_eq!(keys, BTreeSet::from(["name".to_string()]));

        let mut ctx = BootstrapContext::new();
        ctx.insert("name".into(), json!("web-1"));
        assert_eq!(render(source, &ctx).unwrap(), "1: web-1\n2: web-1\n");
    }

    #[test]
    fn test_render_substitutes() {
        let mut ctx = BootstrapContext::new();
        ctx.insert("name".into(), json!("web-1"));
        assert_eq!(
            render("hostname: {{ name }}", &ctx).unwrap(),
            "hostname: web-1"
        );
    }

    #[test]
    fn test_strict_undefined() {
        assert!(matches!(
            render("{{ nope }}", &BootstrapContext::new()),
            Err(VmhostError::Template(_))
        ));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            undeclared_variables("{% if %}"),
            Err(VmhostError::Template(_))
        ));
    }
}
