#![forbid(unsafe_code)]

pub mod ast;
pub mod parser;

pub use ast::Rule;

use crate::sess_warn;
use crate::system::PrivilegedScope;
use std::fs;
use std::path::Path;

/// Reads the main policy file plus every well-named regular file in
/// the include directory, raising to superuser effective identity
/// once per file read and lowering immediately after (§4.2, §3
/// lifecycle note on privileged reads).
///
/// A file name is well-named iff it contains neither `.` nor `~` and
/// does not begin with `#`.
pub fn load(main_path: &str, include_dir: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    let mut include_dir = include_dir.to_string();

    if let Some(text) = read_privileged(main_path) {
        if let Some(dir) = find_includedir_directive(&text) {
            include_dir = dir;
        }
        rules.extend(parser::parse_file(&text, main_path));
    } else {
        sess_warn!("sudoers file {main_path} absent or unreadable, skipped");
    }

    match fs::read_dir(&include_dir) {
        Ok(entries) => {
            let mut names: Vec<_> = entries
                .filter_map(|e| e.ok())
                .filter(|e| is_well_named(&e.file_name().to_string_lossy()))
                .collect();
            names.sort_by_key(|e| e.file_name());
            for entry in names {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let label = path.to_string_lossy().into_owned();
                if let Some(text) = read_privileged(&label) {
                    rules.extend(parser::parse_file(&text, &label));
                }
            }
        }
        Err(_) => sess_warn!("sudoers include directory {include_dir} absent, skipped"),
    }

    rules
}

fn is_well_named(name: &str) -> bool {
    !name.contains('.') && !name.contains('~') && !name.starts_with('#')
}

fn find_includedir_directive(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#includedir") {
            let dir = rest.trim();
            if !dir.is_empty() {
                return Some(dir.to_string());
            }
        }
    }
    None
}

fn read_privileged(path: &str) -> Option<String> {
    let _scope = PrivilegedScope::enter().ok()?;
    fs::read_to_string(Path::new(path)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn well_named_filter_matches_spec() {
        assert!(is_well_named("web-servers"));
        assert!(!is_well_named("backup.disabled"));
        assert!(!is_well_named("notes~"));
        assert!(!is_well_named("#comment-file"));
    }

    #[test]
    fn includedir_directive_is_found() {
        let text = "alice host1 = ALL\n#includedir /etc/sudosh.other\n";
        assert_eq!(
            find_includedir_directive(text),
            Some("/etc/sudosh.other".to_string())
        );
    }

    #[test]
    fn load_parses_main_file_via_parser_directly() {
        let dir = std::env::temp_dir().join(format!("sudosh-test-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        let main = dir.join("main.conf");
        let mut f = fs::File::create(&main).unwrap();
        writeln!(f, "alice host1 = ALL").unwrap();
        let text = fs::read_to_string(&main).unwrap();
        let rules = parser::parse_file(&text, main.to_str().unwrap());
        assert_eq!(rules.len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
