//! Structural self-check for generated GRUB script.
//!
//! The boot-time dialect fails silently on a handful of constructs that a
//! shell would accept. [`check`] tokenizes the script the way GRUB does
//! (quotes, escapes, `${...}` references, `;` separators) and reports:
//!
//! - `return` outside a `function` body
//! - `menuentry`/`submenu` options placed after the title
//! - unbalanced `{ }`, `if/fi` and loop blocks
//! - trailing backslash continuations and unterminated quotes
//! - shell-only constructs (`||`, `&&`, redirections)

use bootstick_shared::errors::{BootstickError, BootstickResult};
use std::fmt;

/// `menuentry` options that consume the following token as their value.
const OPTIONS_WITH_VALUE: &[&str] = &["--class", "--users", "--hotkey", "--id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    BareReturn,
    ModifierAfterTitle,
    MissingTitle,
    UnbalancedBlock,
    LineContinuation,
    ShellConstruct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 1-based line number
    pub line: usize,
    pub kind: ViolationKind,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {:?}: {}", self.line, self.kind, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word { text: String, quoted: bool },
    Separator,
}

struct LexedLine {
    tokens: Vec<Token>,
    continuation: bool,
    unterminated_quote: bool,
}

fn lex(line: &str) -> LexedLine {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    let mut in_word = false;
    let mut continuation = false;
    let mut unterminated_quote = false;
    let mut chars = line.chars().peekable();

    fn flush(tokens: &mut Vec<Token>, word: &mut String, quoted: &mut bool, in_word: &mut bool) {
        if *in_word {
            tokens.push(Token::Word {
                text: std::mem::take(word),
                quoted: *quoted,
            });
        }
        *quoted = false;
        *in_word = false;
    }

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => flush(&mut tokens, &mut word, &mut quoted, &mut in_word),
            ';' => {
                flush(&mut tokens, &mut word, &mut quoted, &mut in_word);
                tokens.push(Token::Separator);
            }
            '\'' => {
                in_word = true;
                quoted = true;
                let mut closed = false;
                for q in chars.by_ref() {
                    if q == '\'' {
                        closed = true;
                        break;
                    }
                    word.push(q);
                }
                unterminated_quote |= !closed;
            }
            '"' => {
                in_word = true;
                quoted = true;
                let mut closed = false;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                word.push(escaped);
                            }
                        }
                        _ => word.push(q),
                    }
                }
                unterminated_quote |= !closed;
            }
            '\\' => match chars.next() {
                Some(escaped) => {
                    in_word = true;
                    word.push(escaped);
                }
                None => continuation = true,
            },
            '$' if chars.peek() == Some(&'{') => {
                in_word = true;
                word.push('$');
                for v in chars.by_ref() {
                    word.push(v);
                    if v == '}' {
                        break;
                    }
                }
            }
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }
    flush(&mut tokens, &mut word, &mut quoted, &mut in_word);

    LexedLine {
        tokens,
        continuation,
        unterminated_quote,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Function,
    Brace,
    If,
    Loop,
}

fn bare(token: &Token) -> Option<&str> {
    match token {
        Token::Word { text, quoted: false } => Some(text.as_str()),
        _ => None,
    }
}

/// All violations found in `script`.
pub fn check(script: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut stack: Vec<(Block, usize)> = Vec::new();

    let mut report = |line: usize, kind: ViolationKind, detail: String| {
        violations.push(Violation { line, kind, detail });
    };

    for (idx, raw) in script.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let lexed = lex(raw);
        if lexed.continuation {
            report(line_no, ViolationKind::LineContinuation, "trailing backslash".into());
        }
        if lexed.unterminated_quote {
            report(line_no, ViolationKind::LineContinuation, "unterminated quote".into());
        }

        for token in &lexed.tokens {
            if let Some(word) = bare(token)
                && (word == "||" || word == "&&" || word.contains('>') || word.starts_with('<'))
            {
                report(line_no, ViolationKind::ShellConstruct, format!("'{}' is not GRUB syntax", word));
            }
        }

        for command in lexed.tokens.split(|t| *t == Token::Separator) {
            // `then`, `do` and `else` may share a command with the next statement
            let mut command = command;
            loop {
                match command.first().and_then(bare) {
                    Some("then") | Some("do") => command = &command[1..],
                    Some("else") => {
                        if stack.last().map(|(b, _)| *b) != Some(Block::If) {
                            report(line_no, ViolationKind::UnbalancedBlock, "'else' outside if".into());
                        }
                        command = &command[1..];
                    }
                    _ => break,
                }
            }
            let Some(first) = command.first() else {
                continue;
            };
            let head = bare(first).unwrap_or("");
            let opens_brace = command.len() > 1 && command.last().and_then(bare) == Some("{");

            match head {
                "function" => {
                    if opens_brace {
                        stack.push((Block::Function, line_no));
                    }
                }
                "menuentry" | "submenu" => {
                    check_entry_header(command, line_no, &mut report);
                    if opens_brace {
                        stack.push((Block::Brace, line_no));
                    }
                }
                "if" => stack.push((Block::If, line_no)),
                "elif" => {
                    if stack.last().map(|(b, _)| *b) != Some(Block::If) {
                        report(line_no, ViolationKind::UnbalancedBlock, "'elif' outside if".into());
                    }
                }
                "fi" => pop(&mut stack, Block::If, "fi", line_no, &mut report),
                "for" | "while" | "until" => stack.push((Block::Loop, line_no)),
                "done" => pop(&mut stack, Block::Loop, "done", line_no, &mut report),
                "}" => match stack.last().map(|(b, _)| *b) {
                    Some(Block::Brace) | Some(Block::Function) => {
                        stack.pop();
                    }
                    _ => report(line_no, ViolationKind::UnbalancedBlock, "'}' without open brace".into()),
                },
                "return" => {
                    if !stack.iter().any(|(b, _)| *b == Block::Function) {
                        report(line_no, ViolationKind::BareReturn, "return outside a function body".into());
                    }
                }
                _ => {
                    if opens_brace {
                        stack.push((Block::Brace, line_no));
                    }
                }
            }
        }
    }

    for (block, line) in stack {
        report(line, ViolationKind::UnbalancedBlock, format!("{:?} block never closed", block));
    }
    violations
}

fn pop(
    stack: &mut Vec<(Block, usize)>,
    expected: Block,
    word: &str,
    line: usize,
    report: &mut impl FnMut(usize, ViolationKind, String),
) {
    if stack.last().map(|(b, _)| *b) == Some(expected) {
        stack.pop();
    } else {
        report(line, ViolationKind::UnbalancedBlock, format!("'{}' without matching open", word));
    }
}

/// Options must precede the title; only the title and `{` may follow.
fn check_entry_header(command: &[Token], line: usize, report: &mut impl FnMut(usize, ViolationKind, String)) {
    let mut rest = command.iter().skip(1).peekable();
    let mut title = None;

    while let Some(token) = rest.next() {
        match bare(token) {
            Some(opt) if opt.starts_with("--") => {
                if !opt.contains('=') && OPTIONS_WITH_VALUE.contains(&opt) {
                    rest.next();
                }
            }
            Some("{") => break,
            _ => {
                title = Some(token);
                break;
            }
        }
    }

    if title.is_none() {
        report(line, ViolationKind::MissingTitle, "entry has no title".into());
        return;
    }
    for token in rest {
        match bare(token) {
            Some("{") => break,
            Some(opt) if opt.starts_with("--") => {
                report(line, ViolationKind::ModifierAfterTitle, format!("'{}' follows the title", opt));
            }
            _ => {}
        }
    }
}

/// Fail with [`BootstickError::ConfigGeneration`] if `script` has violations.
pub fn ensure_conformant(script: &str) -> BootstickResult<()> {
    let violations = check(script);
    if violations.is_empty() {
        return Ok(());
    }
    let listing = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(BootstickError::ConfigGeneration(format!(
        "generated script is not conformant: {}",
        listing
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(script: &str) -> Vec<ViolationKind> {
        check(script).into_iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_clean_script() {
        let script = r#"
set timeout=10
function probe_iso {
  if [ -f "$1" ]; then
    return 0
  fi
  return 1
}
menuentry --hotkey=a --class debian '[A] Ubuntu' {
  linux (loop)/casper/vmlinuz iso-scan/filename=${isofile} quiet
}
"#;
        assert!(check(script).is_empty(), "{:?}", check(script));
    }

    #[test]
    fn test_bare_return() {
        let script = "menuentry 'x' {\n  if [ -z \"$root\" ]; then\n    return\n  fi\n}\n";
        assert_eq!(kinds(script), vec![ViolationKind::BareReturn]);
    }

    #[test]
    fn test_return_after_separator() {
        let script = "if true; then return; fi\n";
        assert_eq!(kinds(script), vec![ViolationKind::BareReturn]);
    }

    #[test]
    fn test_modifier_after_title() {
        let script = "menuentry '[A] Arch' --hotkey=a {\n}\n";
        assert_eq!(kinds(script), vec![ViolationKind::ModifierAfterTitle]);

        let script = "submenu --class x 'Tools' --id tools {\n}\n";
        assert_eq!(kinds(script), vec![ViolationKind::ModifierAfterTitle]);
    }

    #[test]
    fn test_option_values_are_not_titles() {
        let script = "menuentry --class arch --hotkey b 'Arch' {\n}\n";
        assert!(check(script).is_empty());

        let script = "menuentry --class arch {\n}\n";
        assert_eq!(kinds(script), vec![ViolationKind::MissingTitle]);
    }

    #[test]
    fn test_unbalanced_blocks() {
        assert_eq!(kinds("menuentry 'x' {\n  echo\n"), vec![ViolationKind::UnbalancedBlock]);
        assert_eq!(kinds("if true; then\n  echo\n}\n"), vec![
            ViolationKind::UnbalancedBlock,
            ViolationKind::UnbalancedBlock
        ]);
        assert_eq!(kinds("fi\n"), vec![ViolationKind::UnbalancedBlock]);
        assert_eq!(kinds("else\n"), vec![ViolationKind::UnbalancedBlock]);
    }

    #[test]
    fn test_variable_braces_do_not_count() {
        let script = "set root=${bootstick_data}\nlinux (${bootstick_data})/boot/memdisk iso raw\n";
        assert!(check(script).is_empty());
    }

    #[test]
    fn test_line_continuation() {
        assert_eq!(kinds("linux /vmlinuz \\\n  quiet\n"), vec![ViolationKind::LineContinuation]);
        assert_eq!(kinds("echo 'open\n"), vec![ViolationKind::LineContinuation]);
    }

    #[test]
    fn test_shell_constructs() {
        assert_eq!(kinds("loopback -d loop 2>/dev/null\n"), vec![ViolationKind::ShellConstruct]);
        assert_eq!(kinds("rmmod tpm || true\n"), vec![ViolationKind::ShellConstruct]);
        assert!(check("echo 'a > b'\n").is_empty());
    }

    #[test]
    fn test_escaped_quote_in_title() {
        let script = "menuentry --hotkey=a 'Bob'\\''s Linux' {\n}\n";
        assert!(check(script).is_empty());
    }

    #[test]
    fn test_ensure_conformant_error() {
        let err = ensure_conformant("return\n").unwrap_err();
        assert!(matches!(err, BootstickError::ConfigGeneration(_)));
        assert!(err.to_string().contains("line 1"));
    }
}
