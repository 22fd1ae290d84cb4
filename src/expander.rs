/// Expand one ordinary token into the arguments it contributes.
///
/// Surrounding quotes are stripped first; the result then goes through tilde
/// and wildcard expansion. A pattern with no matches expands to itself.
pub fn expand_token(token: &str) -> Vec<String> {
    let unquoted = remove_quotes(token);
    let expanded = expand_tilde(unquoted);
    expand_globs(&expanded)
}

/// Strip one matching pair of surrounding quotes (`'...'` or `"..."`).
/// Anything else, including a lone or mismatched quote, is returned unchanged.
pub fn remove_quotes(token: &str) -> &str {
    if token.len() < 2 {
        return token;
    }

    for quote in ['"', '\''] {
        if let Some(inner) = token.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return inner;
        }
    }

    token
}

// ── Tilde Expansion ──

fn expand_tilde(token: &str) -> String {
    if !token.starts_with('~') {
        return token.to_string();
    }

    let Some(home) = home_dir() else {
        return token.to_string();
    };

    if token == "~" {
        return home;
    }

    if let Some(rest) = token.strip_prefix("~/") {
        return format!("{home}/{rest}");
    }

    // ~username is left alone
    token.to_string()
}

fn home_dir() -> Option<String> {
    std::env::var("HOME").ok().filter(|home| !home.is_empty())
}

// ── Glob Expansion ──

fn contains_glob_chars(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[')
}

fn expand_globs(pattern: &str) -> Vec<String> {
    if !contains_glob_chars(pattern) {
        return vec![pattern.to_string()];
    }

    match glob::glob(pattern) {
        Ok(paths) => {
            let matches: Vec<String> = paths
                .filter_map(|entry| entry.ok())
                .map(|path| path.to_string_lossy().into_owned())
                .collect();

            if matches.is_empty() {
                vec![pattern.to_string()]
            } else {
                matches
            }
        }
        Err(error) => {
            tracing::trace!("invalid glob pattern {pattern:?}: {error}");
            vec![pattern.to_string()]
        }
    }
}
