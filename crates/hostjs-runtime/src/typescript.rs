//! TypeScript front end.
//!
//! TypeScript is compiled by an external compiler process into `.js` files
//! next to their sources. Compilation is skipped when every `.ts` file under
//! the project already has a newer `.js` sibling.

use hostjs_common::{CompilationError, TypeScriptConfig, TYPESCRIPT_SOURCES};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

#[derive(Debug, Clone, Default)]
pub struct TypeScriptPreprocessor {
    config: TypeScriptConfig,
}

impl TypeScriptPreprocessor {
    pub fn new(config: TypeScriptConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TypeScriptConfig {
        &self.config
    }

    /// Whether `path` is a TypeScript source (declaration files excluded).
    pub fn is_typescript(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.ends_with(".ts") && !name.ends_with(".d.ts")
    }

    /// Where the compiler writes the output for `source`.
    pub fn compiled_path(source: &Path) -> PathBuf {
        source.with_extension("js")
    }

    /// The [`TYPESCRIPT_SOURCES`] files under `root`, sorted, relative to `root`.
    pub fn sources(root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    let skipped = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| SKIPPED_DIRS.contains(&n));
                    if !skipped {
                        pending.push(path);
                    }
                } else if Self::is_typescript(&path) {
                    if let Ok(relative) = path.strip_prefix(root) {
                        found.push(relative.to_path_buf());
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Whether the project's compiled output is missing or older than its sources.
    ///
    /// Anything that cannot be determined counts as stale.
    pub fn should_compile(&self, root: &Path) -> bool {
        let sources = match Self::sources(root) {
            Ok(sources) => sources,
            Err(e) => {
                tracing::debug!(project = %root.display(), error = %e, "Cannot list TypeScript sources, compiling");
                return true;
            }
        };

        sources.iter().any(|relative| {
            let source = root.join(relative);
            let output = Self::compiled_path(&source);
            match (modified(&source), modified(&output)) {
                (Some(source_time), Some(output_time)) => source_time > output_time,
                _ => true,
            }
        })
    }

    /// Runs the compiler over every source under `root` and waits for it.
    ///
    /// Compiler output is streamed to the log line by line and kept as the
    /// diagnostics of a failed run.
    pub fn compile(&self, root: &Path) -> Result<(), CompilationError> {
        let launch_error = |source| CompilationError::Launch {
            project: root.to_path_buf(),
            compiler: self.config.compiler.clone(),
            source,
        };

        let sources = Self::sources(root).map_err(launch_error)?;
        if sources.is_empty() {
            return Ok(());
        }

        tracing::info!(
            project = %root.display(),
            compiler = %self.config.compiler,
            files = sources.len(),
            "Compiling TypeScript"
        );

        let mut child = Command::new(&self.config.compiler)
            .args(self.config.compiler_args(&sources))
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch_error)?;

        let stderr = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut output = String::new();
                let _ = stderr.read_to_string(&mut output);
                output
            })
        });

        let mut diagnostics = String::new();
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line.map_err(launch_error)?;
                tracing::info!(target: "hostjs::tsc", "{}", line);
                diagnostics.push_str(&line);
                diagnostics.push('\n');
            }
        }

        let status = child.wait().map_err(launch_error)?;
        if let Some(stderr) = stderr.and_then(|handle| handle.join().ok()) {
            for line in stderr.lines() {
                tracing::warn!(target: "hostjs::tsc", "{}", line);
            }
            diagnostics.push_str(&stderr);
        }

        if status.success() {
            Ok(())
        } else {
            Err(CompilationError::Failed {
                project: root.to_path_buf(),
                status: status.code(),
                diagnostics,
            })
        }
    }

    /// Compiles `root` if stale and returns the JavaScript path for `entry`.
    pub fn prepare(&self, root: &Path, entry: &Path) -> Result<PathBuf, CompilationError> {
        if self.should_compile(root) {
            self.compile(root)?;
        } else {
            tracing::debug!(project = %root.display(), "TypeScript output is up to date");
        }
        Ok(Self::compiled_path(entry))
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &str, age: Duration) {
        std::fs::write(path, contents).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_is_typescript() {
        assert!(TypeScriptPreprocessor::is_typescript(Path::new("a/main.ts")));
        assert!(!TypeScriptPreprocessor::is_typescript(Path::new("a/types.d.ts")));
        assert!(!TypeScriptPreprocessor::is_typescript(Path::new("a/main.js")));
    }

    #[test]
    fn test_sources_skip_node_modules_and_declarations() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        std::fs::write(root.join("main.ts"), "").unwrap();
        std::fs::write(root.join("src/util.ts"), "").unwrap();
        std::fs::write(root.join("src/types.d.ts"), "").unwrap();
        std::fs::write(root.join("node_modules/dep/index.ts"), "").unwrap();

        let sources = TypeScriptPreprocessor::sources(root).unwrap();
        assert_eq!(sources, vec![PathBuf::from("main.ts"), PathBuf::from("src/util.ts")]);
    }

    #[test]
    fn test_should_compile_when_output_missing_or_older() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let preprocessor = TypeScriptPreprocessor::default();

        touch(&root.join("main.ts"), "export default 1;", Duration::from_secs(60));
        assert!(preprocessor.should_compile(root));

        touch(&root.join("main.js"), "export default 1;", Duration::from_secs(120));
        assert!(preprocessor.should_compile(root));

        touch(&root.join("main.js"), "export default 1;", Duration::from_secs(0));
        assert!(!preprocessor.should_compile(root));
    }

    #[test]
    fn test_unreadable_project_compiles() {
        let preprocessor = TypeScriptPreprocessor::default();
        assert!(preprocessor.should_compile(Path::new("/nonexistent/hostjs/project")));
    }

    #[test]
    fn test_missing_compiler_is_a_launch_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.ts"), "").unwrap();
        let preprocessor = TypeScriptPreprocessor::new(
            TypeScriptConfig::new().with_compiler("/nonexistent/hostjs-tsc"),
        );
        match preprocessor.compile(dir.path()) {
            Err(CompilationError::Launch { project, compiler, .. }) => {
                assert_eq!(project, dir.path());
                assert_eq!(compiler, "/nonexistent/hostjs-tsc");
            }
            other => panic!("expected launch error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_compiler_carries_diagnostics() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let compiler = dir.path().join("fake-tsc.sh");
        std::fs::write(&compiler, "#!/bin/sh\necho \"main.ts(1,1): error TS1005\"\nexit 2\n").unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("main.ts"), "let x: = 1").unwrap();

        let preprocessor = TypeScriptPreprocessor::new(
            TypeScriptConfig::new().with_compiler(compiler.display().to_string()),
        );
        match preprocessor.compile(&project) {
            Err(CompilationError::Failed { status, diagnostics, .. }) => {
                assert_eq!(status, Some(2));
                assert!(diagnostics.contains("TS1005"));
            }
            other => panic!("expected compilation failure, got {:?}", other),
        }
    }
}
