use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("failed to read shader source {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("include cycle detected: {}", format_chain(.0))]
    Cycle(Vec<PathBuf>),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Source text with every `#include "..."` expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
    pub source: String,
    /// Every file pulled in through an include, in expansion order.
    pub includes: Vec<PathBuf>,
}

/// Expands `#include "relative/path"` lines recursively.
///
/// Paths resolve against the directory of the including file. With `line_directives` set, each
/// expanded file starts with `#line 1` and the line after an include is announced again with
/// `#line`, so compiler logs keep pointing at the line numbers of the file being edited.
pub fn preprocess_includes(
    path: impl AsRef<Path>,
    line_directives: bool,
) -> Result<Preprocessed, IncludeError> {
    let mut stack = Vec::new();
    let mut includes = Vec::new();
    let source = expand(path.as_ref(), line_directives, &mut stack, &mut includes)?;
    Ok(Preprocessed { source, includes })
}

fn expand(
    path: &Path,
    line_directives: bool,
    stack: &mut Vec<PathBuf>,
    includes: &mut Vec<PathBuf>,
) -> Result<String, IncludeError> {
    let identity = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if stack.contains(&identity) {
        let mut chain = stack.clone();
        chain.push(identity);
        return Err(IncludeError::Cycle(chain));
    }

    let content = fs::read_to_string(path).map_err(|error| IncludeError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    stack.push(identity);
    let mut result = String::with_capacity(content.len());
    if line_directives {
        result.push_str("#line 1\n");
    }
    for (index, line) in content.split_inclusive('\n').enumerate() {
        match parse_include(line) {
            Some(target) => {
                let dependency = dir.join(target);
                tracing::debug!(file = %dependency.display(), "expanding include");
                let expanded = expand(&dependency, line_directives, stack, includes)?;
                includes.push(dependency);
                result.push_str(&expanded);
                if !expanded.ends_with('\n') {
                    result.push('\n');
                }
                if line_directives {
                    result.push_str(&format!("#line {}\n", index + 2));
                }
            }
            None => result.push_str(line),
        }
    }
    stack.pop();
    Ok(result)
}

fn parse_include(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("#include")?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn expands_nested_includes_with_line_directives() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/common.glsl"), "float k = 1.0;\n").unwrap();
        fs::write(
            dir.path().join("lib/noise.glsl"),
            "#include \"common.glsl\"\nfloat noise() { return k; }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("main.glsl"),
            "// header\n#include \"lib/noise.glsl\"\nvoid mainImage() {}\n",
        )
        .unwrap();

        let result = preprocess_includes(dir.path().join("main.glsl"), true).unwrap();
        assert_eq!(
            result.source,
            "#line 1\n// header\n#line 1\n#line 1\nfloat k = 1.0;\n#line 2\nfloat noise() { return k; }\n#line 3\nvoid mainImage() {}\n"
        );
        assert_eq!(result.includes.len(), 2);
        assert!(result.includes[0].ends_with("common.glsl"));
        assert!(result.includes[1].ends_with("lib/noise.glsl"));
    }

    #[test]
    fn omits_directives_on_request() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.glsl"), "int a;\n").unwrap();
        fs::write(dir.path().join("main.glsl"), "#include \"a.glsl\"\nint b;\n").unwrap();
        let result = preprocess_includes(dir.path().join("main.glsl"), false).unwrap();
        assert_eq!(result.source, "int a;\nint b;\n");
    }

    #[test]
    fn rejects_include_cycles() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.glsl"), "#include \"b.glsl\"\n").unwrap();
        fs::write(dir.path().join("b.glsl"), "#include \"a.glsl\"\n").unwrap();
        let err = preprocess_includes(dir.path().join("a.glsl"), true).unwrap_err();
        assert!(matches!(err, IncludeError::Cycle(ref chain) if chain.len() == 3));
    }

    #[test]
    fn reports_missing_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.glsl"), "#include \"nope.glsl\"\n").unwrap();
        let err = preprocess_includes(dir.path().join("main.glsl"), true).unwrap_err();
        assert!(matches!(err, IncludeError::Read { ref path, .. } if path.ends_with("nope.glsl")));
    }
}
