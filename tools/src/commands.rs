//! Shell command-line inspection.

use std::path::Path;

/// The program name of every simple command in `command`.
///
/// Segments are separated by `&&`, `||`, `;`, `|`, `&` and newlines that
/// appear outside quotes. Leading `VAR=value` assignments are skipped and
/// paths are reduced to their basename, so `FOO=1 /usr/bin/git status`
/// yields `git`. Duplicates are removed, first occurrence wins.
#[must_use]
pub fn command_roots(command: &str) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    for segment in split_segments(command) {
        if let Some(root) = segment_root(&segment)
            && !roots.contains(&root)
        {
            roots.push(root);
        }
    }
    roots
}

fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut single = false;
    let mut double = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if !single => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !double => {
                single = !single;
                current.push(c);
            }
            '"' if !single => {
                double = !double;
                current.push(c);
            }
            // `2>&1`, `<&3` and `&>file` are redirections, not separators.
            '&' if current.ends_with(['>', '<']) || chars.peek() == Some(&'>') => {
                current.push(c);
            }
            ';' | '\n' | '|' | '&' if !single && !double => {
                if matches!(chars.peek(), Some(&next) if next == c && c != ';' && c != '\n') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn segment_root(segment: &str) -> Option<String> {
    let trimmed = segment.trim().trim_start_matches(['(', '{']).trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let words = shlex::split(trimmed)
        .unwrap_or_else(|| trimmed.split_whitespace().map(str::to_string).collect());
    let word = words.into_iter().find(|word| !is_assignment(word))?;
    let program = word.trim_end_matches([')', '}']);
    if program.is_empty() {
        return None;
    }
    let base = Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| program.to_string(), str::to_string);
    Some(base)
}

/// `NAME=value` prefix of a simple command.
fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::command_roots;

    #[test]
    fn single_command() {
        assert_eq!(command_roots("ls -la"), vec!["ls"]);
    }

    #[test]
    fn chained_commands() {
        assert_eq!(
            command_roots("npm install && npm test || git status; make"),
            vec!["npm", "git", "make"]
        );
    }

    #[test]
    fn pipes_background_and_newlines() {
        assert_eq!(
            command_roots("cat log | grep err\nsleep 1 & rm x"),
            vec!["cat", "grep", "sleep", "rm"]
        );
    }

    #[test]
    fn separators_inside_quotes_are_ignored() {
        assert_eq!(command_roots(r#"echo "a && b; c" | wc -l"#), vec!["echo", "wc"]);
        assert_eq!(command_roots("grep 'x|y' file"), vec!["grep"]);
    }

    #[test]
    fn redirections_are_not_separators() {
        assert_eq!(command_roots("make 2>&1 | tee out"), vec!["make", "tee"]);
        assert_eq!(command_roots("build &>log && ls"), vec!["build", "ls"]);
    }

    #[test]
    fn paths_reduce_to_basename() {
        assert_eq!(command_roots("/usr/bin/git pull"), vec!["git"]);
    }

    #[test]
    fn env_assignments_are_skipped() {
        assert_eq!(command_roots("RUST_LOG=debug cargo run"), vec!["cargo"]);
    }

    #[test]
    fn subshell_parens_are_stripped() {
        assert_eq!(command_roots("(cd sub && make)"), vec!["cd", "make"]);
    }

    #[test]
    fn empty_command_has_no_roots() {
        assert!(command_roots("   ").is_empty());
        assert!(command_roots(";;").is_empty());
    }
}
