use anyhow::{Context as AnyhowContext, Result};
use boa_engine::{Context, Source};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
}

/// An isolated runtime that can take a fresh artifact and report whether it
/// failed. A JavaScript failure is not a `load` error; it surfaces through
/// `current_error` until the next load clears or replaces it.
pub trait Sandbox {
    fn load(&mut self, source_code: &str, dependencies: &BTreeMap<String, String>) -> Result<()>;
    fn current_error(&self) -> Option<RuntimeError>;
    fn preview_url(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub path: &'static str,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxProject {
    pub files: Vec<ProjectFile>,
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>Kiln Preview</title>
  <script src="https://cdn.tailwindcss.com"></script>
  <script>
    const report = (message) => {
      fetch("/__kiln/error", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ message: String(message) }),
      }).catch(() => {});
    };
    window.onerror = (message) => { report(message); };
    window.addEventListener("unhandledrejection", (event) => {
      report(event.reason);
    });
  </script>
</head>
<body>
  <div id="root"></div>
  <script type="module" src="/index.js"></script>
</body>
</html>
"#;

const INDEX_JS: &str = r#"import React from "react";
import { createRoot } from "react-dom/client";
import App from "./App";

const rootElement = document.getElementById("root");
const root = createRoot(rootElement);
root.render(<App />);
"#;

impl SandboxProject {
    /// Composes the preview file set. Dependencies are forwarded verbatim
    /// into the manifest, unvalidated.
    pub fn compose(source_code: &str, dependencies: &BTreeMap<String, String>) -> Result<Self> {
        let manifest = serde_json::json!({
            "name": "kiln-preview",
            "version": "1.0.0",
            "dependencies": dependencies,
        });
        let manifest_text = serde_json::to_string_pretty(&manifest)
            .context("failed serializing preview manifest")?;

        Ok(Self {
            files: vec![
                ProjectFile {
                    path: "index.html",
                    contents: INDEX_HTML.to_string(),
                },
                ProjectFile {
                    path: "index.js",
                    contents: INDEX_JS.to_string(),
                },
                ProjectFile {
                    path: "App.js",
                    contents: source_code.to_string(),
                },
                ProjectFile {
                    path: "package.json",
                    contents: manifest_text,
                },
            ],
        })
    }

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed creating preview dir {}", dir.display()))?;
        for file in &self.files {
            fs::write(dir.join(file.path), &file.contents)
                .with_context(|| format!("failed writing preview file {}", file.path))?;
        }
        Ok(())
    }
}

/// Strips ESM syntax so generated component sources evaluate as plain
/// scripts inside the embedded engine.
pub fn strip_module_syntax(input: &str) -> String {
    let mut output = String::new();
    for line in input.lines() {
        let trimmed = line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("export default ") {
            output.push_str(rest);
            output.push('\n');
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("export ") {
            output.push_str(rest);
            output.push('\n');
            continue;
        }

        if trimmed.starts_with("import ") {
            continue;
        }

        output.push_str(line);
        output.push('\n');
    }

    output.trim_end().to_string()
}

/// Boa-backed sandbox. Every load evaluates in a fresh context so prior
/// artifacts cannot leak state into the next one.
pub struct EmbeddedSandbox {
    error: Option<RuntimeError>,
}

impl EmbeddedSandbox {
    pub fn new() -> Self {
        Self { error: None }
    }

    fn fresh_context() -> Context {
        let mut ctx = Context::default();
        // Minimal console support for generated code.
        let _ = ctx.eval(Source::from_bytes(
            r#"
globalThis.console = globalThis.console || {};
globalThis.console.log = () => {};
globalThis.console.error = () => {};
globalThis.console.warn = () => {};
"#,
        ));
        ctx
    }
}

impl Default for EmbeddedSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox for EmbeddedSandbox {
    fn load(&mut self, source_code: &str, _dependencies: &BTreeMap<String, String>) -> Result<()> {
        let script = strip_module_syntax(source_code);
        let mut ctx = Self::fresh_context();

        self.error = match ctx.eval(Source::from_bytes(&script)) {
            Ok(_) => None,
            Err(err) => Some(RuntimeError {
                message: err.to_string(),
            }),
        };
        Ok(())
    }

    fn current_error(&self) -> Option<RuntimeError> {
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{EmbeddedSandbox, Sandbox, SandboxProject, strip_module_syntax};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn deps() -> BTreeMap<String, String> {
        let mut deps = BTreeMap::new();
        deps.insert("react".to_string(), "18.2.0".to_string());
        deps.insert("framer-motion".to_string(), "10.16.1".to_string());
        deps
    }

    #[test]
    fn clean_script_clears_error_signal() {
        let mut sandbox = EmbeddedSandbox::new();
        sandbox.load("const a = 1 + 1;", &deps()).expect("load should pass");
        assert_eq!(sandbox.current_error(), None);
    }

    #[test]
    fn throwing_script_sets_error_signal() {
        let mut sandbox = EmbeddedSandbox::new();
        sandbox
            .load("throw new Error('boom')", &deps())
            .expect("load should pass");
        let error = sandbox.current_error().expect("error expected");
        assert!(error.message.contains("boom"));
    }

    #[test]
    fn next_load_replaces_error_signal() {
        let mut sandbox = EmbeddedSandbox::new();
        sandbox.load("undefinedSymbol()", &deps()).expect("load should pass");
        assert!(sandbox.current_error().is_some());

        sandbox.load("1 + 1", &deps()).expect("load should pass");
        assert_eq!(sandbox.current_error(), None);
    }

    #[test]
    fn loads_are_isolated_from_each_other() {
        let mut sandbox = EmbeddedSandbox::new();
        sandbox.load("const shared = 1;", &deps()).expect("load should pass");
        sandbox.load("shared", &deps()).expect("load should pass");
        assert!(
            sandbox.current_error().expect("error expected").message.contains("shared"),
            "prior load's bindings must not leak"
        );
    }

    #[test]
    fn module_syntax_is_stripped_before_evaluation() {
        let mut sandbox = EmbeddedSandbox::new();
        sandbox
            .load(
                "import React from \"react\";\nexport default function App() { return null; }",
                &deps(),
            )
            .expect("load should pass");
        assert_eq!(sandbox.current_error(), None);
    }

    #[test]
    fn strip_module_syntax_keeps_body() {
        let stripped = strip_module_syntax(
            "import x from \"y\";\nexport const a = 1;\nexport default function App() {}\nconst b = 2;",
        );
        assert!(!stripped.contains("import "));
        assert!(stripped.contains("const a = 1;"));
        assert!(stripped.contains("function App() {}"));
        assert!(stripped.contains("const b = 2;"));
    }

    #[test]
    fn project_carries_dependencies_verbatim() {
        let project = SandboxProject::compose("const x = 1;", &deps()).expect("compose");
        let manifest = project
            .files
            .iter()
            .find(|f| f.path == "package.json")
            .expect("manifest present");
        let parsed: serde_json::Value =
            serde_json::from_str(&manifest.contents).expect("manifest is JSON");
        assert_eq!(parsed["dependencies"]["react"], "18.2.0");
        assert_eq!(parsed["dependencies"]["framer-motion"], "10.16.1");
    }

    #[test]
    fn project_has_entry_point_mount_module_and_source() {
        let project = SandboxProject::compose("const x = 1;", &deps()).expect("compose");
        let paths: Vec<&str> = project.files.iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["index.html", "index.js", "App.js", "package.json"]);

        let app = project.files.iter().find(|f| f.path == "App.js").expect("App.js");
        assert_eq!(app.contents, "const x = 1;");
    }

    #[test]
    fn project_writes_all_files() {
        let dir = tempdir().expect("tempdir should work");
        let project = SandboxProject::compose("const x = 1;", &deps()).expect("compose");
        project.write_to(dir.path()).expect("write should pass");

        for name in ["index.html", "index.js", "App.js", "package.json"] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
    }
}
