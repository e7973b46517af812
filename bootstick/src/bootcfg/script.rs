//! Indentation- and block-aware writer for GRUB script text.
//!
//! Every block opened through the writer must be closed through it, so
//! balanced nesting holds by construction. Closing the wrong kind of block
//! or finishing with open blocks is reported by [`ScriptWriter::finish`].

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Brace,
    If,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptWriter {
    out: String,
    open: Vec<Block>,
    error: Option<String>,
}

impl ScriptWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
    }

    fn raw_line(&mut self, depth: usize, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        self.indent(depth);
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let depth = self.open.len();
        self.raw_line(depth, text.as_ref());
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn comment(&mut self, text: impl AsRef<str>) {
        self.line(format!("# {}", text.as_ref()));
    }

    /// `<header> {`
    pub fn open_brace(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.open.push(Block::Brace);
    }

    pub fn close_brace(&mut self) {
        self.close(Block::Brace, "}");
    }

    /// `if <condition>; then`
    pub fn open_if(&mut self, condition: impl AsRef<str>) {
        self.line(format!("if {}; then", condition.as_ref()));
        self.open.push(Block::If);
    }

    /// `elif <condition>; then` inside the innermost `if`.
    pub fn elif(&mut self, condition: impl AsRef<str>) {
        self.branch(&format!("elif {}; then", condition.as_ref()));
    }

    pub fn else_branch(&mut self) {
        self.branch("else");
    }

    pub fn close_if(&mut self) {
        self.close(Block::If, "fi");
    }

    fn branch(&mut self, text: &str) {
        if self.open.last() != Some(&Block::If) {
            self.fail(format!("'{}' outside an if block", text));
            return;
        }
        let depth = self.open.len() - 1;
        self.raw_line(depth, text);
    }

    fn close(&mut self, expected: Block, text: &str) {
        match self.open.last() {
            Some(top) if *top == expected => {
                self.open.pop();
                let depth = self.open.len();
                self.raw_line(depth, text);
            }
            other => self.fail(format!("'{}' closes {:?}", text, other)),
        }
    }

    fn fail(&mut self, message: String) {
        self.error.get_or_insert(message);
    }

    pub fn finish(self) -> Result<String, String> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !self.open.is_empty() {
            return Err(format!("{} block(s) left open", self.open.len()));
        }
        Ok(self.out)
    }
}

/// Single-quote `text` for GRUB. Embedded quotes become `'\''`.
pub(crate) fn single_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

/// Double-quote `text` as a literal for GRUB. `"`, `\` and `$` are escaped.
pub(crate) fn double_quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_and_indent() {
        let mut w = ScriptWriter::new();
        w.open_brace("menuentry 'x'");
        w.open_if("[ -f a ]");
        w.line("echo a");
        w.elif("[ -f b ]");
        w.line("echo b");
        w.else_branch();
        w.line("echo none");
        w.close_if();
        w.close_brace();

        let text = w.finish().unwrap();
        assert_eq!(
            text,
            "menuentry 'x' {\n  if [ -f a ]; then\n    echo a\n  elif [ -f b ]; then\n    echo b\n  else\n    echo none\n  fi\n}\n"
        );
    }

    #[test]
    fn test_unclosed_block_is_error() {
        let mut w = ScriptWriter::new();
        w.open_brace("menuentry 'x'");
        assert!(w.finish().unwrap_err().contains("left open"));
    }

    #[test]
    fn test_mismatched_close_is_error() {
        let mut w = ScriptWriter::new();
        w.open_if("true");
        w.close_brace();
        assert!(w.finish().is_err());
    }

    #[test]
    fn test_quoting() {
        assert_eq!(single_quote("Tails"), "'Tails'");
        assert_eq!(single_quote("Bob's Linux"), "'Bob'\\''s Linux'");
        assert_eq!(double_quote_literal("say \"hi\" $5"), "\"say \\\"hi\\\" \\$5\"");
    }
}
