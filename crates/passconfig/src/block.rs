pub const CONFIG_START: &str = "%%config-start%%";
pub const CONFIG_END: &str = "%%config-end%%";

/// The raw text of an embedded configuration block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigBlock<'a> {
    pub body: &'a str,
    /// 1-based line of the start marker in the shader source.
    pub line: usize,
}

/// Finds the text between the first start marker and the first end marker after it.
///
/// Returns `None` when either marker is missing, which callers treat as "no block".
pub fn extract_block(source: &str) -> Option<ConfigBlock<'_>> {
    let start = source.find(CONFIG_START)?;
    let body_start = start + CONFIG_START.len();
    let body_len = source[body_start..].find(CONFIG_END)?;
    let line = source[..start].matches('\n').count() + 1;
    Some(ConfigBlock {
        body: &source[body_start..body_start + body_len],
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_body_inside_comment() {
        let source = "/*\n%%config-start%%\nprograms: []\n%%config-end%%\n*/\nvoid f() {}\n";
        let block = extract_block(source).expect("block");
        assert_eq!(block.body.trim(), "programs: []");
        assert_eq!(block.line, 2);
    }

    #[test]
    fn missing_or_misordered_markers_mean_no_block() {
        assert!(extract_block("void mainImage(out vec4 c, vec2 p) {}").is_none());
        assert!(extract_block("%%config-start%%\nsamplers: []\n").is_none());
        assert!(extract_block("%%config-end%%\n%%config-start%%\n").is_none());
    }
}
