//! Candidate table and column names for declared names.

/// Returns the names probed for a declared entity or property name.
///
/// Explicit aliases replace the generated list. Otherwise the candidates are
/// the name as declared, upper and lower case, then the underscored form in
/// the same three cases. Order is deterministic and duplicates are dropped.
pub fn name_candidates(name: &str, explicit: &[String]) -> Vec<String> {
    if !explicit.is_empty() {
        let mut out: Vec<String> = Vec::with_capacity(explicit.len());
        for alias in explicit {
            push_unique(&mut out, alias.clone());
        }
        return out;
    }
    let underscored = underscore(name);
    let mut out = Vec::with_capacity(6);
    push_unique(&mut out, name.to_owned());
    push_unique(&mut out, name.to_ascii_uppercase());
    push_unique(&mut out, name.to_ascii_lowercase());
    push_unique(&mut out, underscored.clone());
    push_unique(&mut out, underscored.to_ascii_uppercase());
    push_unique(&mut out, underscored.to_ascii_lowercase());
    out
}

fn push_unique(out: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// Inserts underscores at camel-case word boundaries.
///
/// `deptId` becomes `dept_Id`; an acronym run keeps together, so
/// `HTTPServer` becomes `HTTP_Server`.
pub fn underscore(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower);
            if boundary && prev != '_' {
                out.push('_');
            }
        }
        out.push(c);
    }
    out
}
