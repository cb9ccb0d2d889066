//! Domain types shared by the loader, the vector store and the ranking code.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChunkId = String;

/// Closed subject vocabulary. Serialized with the canonical Chinese labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "语文")]
    Chinese,
    #[serde(rename = "数学")]
    Math,
    #[serde(rename = "英语")]
    English,
    #[serde(rename = "物理")]
    Physics,
    #[serde(rename = "化学")]
    Chemistry,
    #[serde(rename = "生物")]
    Biology,
    #[serde(rename = "历史")]
    History,
    #[serde(rename = "地理")]
    Geography,
    #[serde(rename = "政治")]
    Politics,
    #[serde(rename = "音乐")]
    Music,
    #[serde(rename = "美术")]
    Art,
    #[serde(rename = "体育")]
    PhysicalEducation,
    #[serde(rename = "其他")]
    Other,
}

impl Subject {
    pub const ALL: [Subject; 13] = [
        Subject::Chinese,
        Subject::Math,
        Subject::English,
        Subject::Physics,
        Subject::Chemistry,
        Subject::Biology,
        Subject::History,
        Subject::Geography,
        Subject::Politics,
        Subject::Music,
        Subject::Art,
        Subject::PhysicalEducation,
        Subject::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Chinese => "语文",
            Subject::Math => "数学",
            Subject::English => "英语",
            Subject::Physics => "物理",
            Subject::Chemistry => "化学",
            Subject::Biology => "生物",
            Subject::History => "历史",
            Subject::Geography => "地理",
            Subject::Politics => "政治",
            Subject::Music => "音乐",
            Subject::Art => "美术",
            Subject::PhysicalEducation => "体育",
            Subject::Other => "其他",
        }
    }

    /// Exact match against the canonical labels only.
    pub fn from_canonical(label: &str) -> Option<Subject> {
        Subject::ALL.iter().copied().find(|s| s.as_str() == label)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed grade vocabulary: the nine compulsory-education grades plus `未知`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "一年级")]
    One,
    #[serde(rename = "二年级")]
    Two,
    #[serde(rename = "三年级")]
    Three,
    #[serde(rename = "四年级")]
    Four,
    #[serde(rename = "五年级")]
    Five,
    #[serde(rename = "六年级")]
    Six,
    #[serde(rename = "七年级")]
    Seven,
    #[serde(rename = "八年级")]
    Eight,
    #[serde(rename = "九年级")]
    Nine,
    #[serde(rename = "未知")]
    Unknown,
}

impl Grade {
    pub const ALL: [Grade; 10] = [
        Grade::One,
        Grade::Two,
        Grade::Three,
        Grade::Four,
        Grade::Five,
        Grade::Six,
        Grade::Seven,
        Grade::Eight,
        Grade::Nine,
        Grade::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::One => "一年级",
            Grade::Two => "二年级",
            Grade::Three => "三年级",
            Grade::Four => "四年级",
            Grade::Five => "五年级",
            Grade::Six => "六年级",
            Grade::Seven => "七年级",
            Grade::Eight => "八年级",
            Grade::Nine => "九年级",
            Grade::Unknown => "未知",
        }
    }

    pub fn from_canonical(label: &str) -> Option<Grade> {
        Grade::ALL.iter().copied().find(|g| g.as_str() == label)
    }

    /// School year 1..=9, `None` for `未知`.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Grade::Unknown => None,
            other => Grade::ALL.iter().position(|g| *g == other).map(|i| i as u8 + 1),
        }
    }

    /// Same grade or one school year apart. `未知` is adjacent to nothing.
    pub fn is_adjacent(self, other: Grade) -> bool {
        match (self.ordinal(), other.ordinal()) {
            (Some(a), Some(b)) => a.abs_diff(b) <= 1,
            _ => false,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of retrievable teaching material.
///
/// `embedding` is optional on load (records may arrive without vectors and get
/// embedded during ingestion) but must be present with the collection width on
/// upsert. Rows read back from the store carry no embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub text: String,
    pub subject: Subject,
    pub grade: Grade,
    pub quality_score: f32,
    pub size_bytes: u64,
    pub source: String,
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Equality filters pushed down to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub subject: Option<Subject>,
    pub grade: Option<Grade>,
}

impl QueryFilter {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.grade.is_none()
    }

    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        self.subject.map_or(true, |s| s == chunk.subject)
            && self.grade.map_or(true, |g| g == chunk.grade)
    }
}

/// A store hit before ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// A candidate that survived the similarity floor, with its combined score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk: DocumentChunk,
    pub similarity: f32,
    pub quality_score: f32,
    pub combined_score: f32,
}
