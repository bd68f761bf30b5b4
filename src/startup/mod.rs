//! # Startup Scripts
//!
//! Built-in boot scripts, rendered with Handlebars. The rendered text goes
//! into the `startup-script` metadata item as-is; nothing downstream reads it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use handlebars::Handlebars;

const WATCHER: &str = include_str!("templates/watcher.sh.hbs");
const WEBAPP: &str = include_str!("templates/webapp.sh.hbs");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// apache2 plus an inotify watcher that copies a file elsewhere on change.
    Watcher,
    /// Clones a Node.js app, runs it under supervisor and forwards port 80 to it.
    Webapp,
}

impl Template {
    pub const ALL: [Template; 2] = [Template::Watcher, Template::Webapp];

    pub fn name(self) -> &'static str {
        match self {
            Template::Watcher => "watcher",
            Template::Webapp => "webapp",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Template::Watcher => WATCHER,
            Template::Webapp => WEBAPP,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Template {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Template::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .with_context(|| {
                let known: Vec<&str> = Template::ALL.iter().map(|t| t.name()).collect();
                format!("unknown template {:?} (known: {})", s, known.join(", "))
            })
    }
}

/// Variables every template can rely on. `repo` has no default.
pub fn default_vars(zone: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("zone".to_string(), zone.to_string());
    vars.insert("watch_file".to_string(), "/home/test.txt".to_string());
    vars.insert("sync_target".to_string(), "db:~/test.txt".to_string());
    vars.insert("app_dir".to_string(), "/opt/app".to_string());
    vars.insert("app_name".to_string(), "app".to_string());
    vars.insert("port".to_string(), "8080".to_string());
    vars
}

/// Parses a `KEY=VALUE` override.
pub fn parse_var(s: &str) -> Result<(String, String)> {
    let Some((key, value)) = s.split_once('=') else {
        bail!("expected KEY=VALUE, got {:?}", s);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in {:?}", s);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Renders `template`. A variable the template uses but `vars` lacks is an error.
pub fn render(template: Template, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(true);
    // Shell, not HTML.
    hb.register_escape_fn(handlebars::no_escape);
    hb.render_template(template.source(), vars)
        .with_context(|| format!("Failed to render startup script template {}", template))
}
