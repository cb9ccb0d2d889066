//! Canonical grade and subject labels.
//!
//! Every function here is total: unknown input maps to `未知` / `其他`, never to an error.

use crate::types::{Grade, Subject};

/// Colloquial grade labels and the canonical grade they stand for.
pub const GRADE_MAPPING: &[(&str, Grade)] = &[
    ("小学一年级", Grade::One),
    ("小学二年级", Grade::Two),
    ("小学三年级", Grade::Three),
    ("小学四年级", Grade::Four),
    ("小学五年级", Grade::Five),
    ("小学六年级", Grade::Six),
    ("初中一年级", Grade::Seven),
    ("初中二年级", Grade::Eight),
    ("初中三年级", Grade::Nine),
    ("初一", Grade::Seven),
    ("初二", Grade::Eight),
    ("初三", Grade::Nine),
];

const SUBJECT_ALIASES: &[(&str, Subject)] = &[
    ("道德与法治", Subject::Politics),
    ("思想品德", Subject::Politics),
];

/// Exact-match lookup: mapping table first, then canonical labels, else `未知`.
pub fn normalize_grade(raw: &str) -> Grade {
    GRADE_MAPPING
        .iter()
        .find(|(label, _)| *label == raw)
        .map(|(_, grade)| *grade)
        .or_else(|| Grade::from_canonical(raw))
        .unwrap_or(Grade::Unknown)
}

/// Canonical label or known alias, else `其他`.
pub fn normalize_subject(raw: &str) -> Subject {
    Subject::from_canonical(raw)
        .or_else(|| {
            SUBJECT_ALIASES
                .iter()
                .find(|(alias, _)| *alias == raw)
                .map(|(_, subject)| *subject)
        })
        .unwrap_or(Subject::Other)
}

/// Best-effort grade from a file name such as `七年级上册数学人教版.json`.
///
/// Longer labels are tried first so `初中二年级` wins over `二年级`.
pub fn infer_grade_from_name(name: &str) -> Option<Grade> {
    let mut labels: Vec<(&str, Grade)> = GRADE_MAPPING.to_vec();
    labels.extend(
        Grade::ALL
            .iter()
            .filter(|g| **g != Grade::Unknown)
            .map(|g| (g.as_str(), *g)),
    );
    labels.sort_by_key(|(label, _)| std::cmp::Reverse(label.chars().count()));

    if let Some((_, grade)) = labels.iter().find(|(label, _)| name.contains(label)) {
        return Some(*grade);
    }
    infer_digit_grade(name)
}

// "7年级" style labels.
fn infer_digit_grade(name: &str) -> Option<Grade> {
    let chars: Vec<char> = name.chars().collect();
    chars.windows(3).find_map(|w| {
        if w[1] != '年' || w[2] != '级' {
            return None;
        }
        let n = w[0].to_digit(10)?;
        Grade::ALL.iter().copied().find(|g| g.ordinal() == Some(n as u8))
    })
}

/// Best-effort subject from a file name. `其他` is never inferred.
pub fn infer_subject_from_name(name: &str) -> Option<Subject> {
    Subject::ALL
        .iter()
        .copied()
        .filter(|s| *s != Subject::Other)
        .find(|s| name.contains(s.as_str()))
        .or_else(|| {
            SUBJECT_ALIASES
                .iter()
                .find(|(alias, _)| name.contains(alias))
                .map(|(_, subject)| *subject)
        })
}
