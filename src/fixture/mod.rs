//! Evaluation fixtures.
//!
//! A fixture is a small set of papers with known topical groups. Each paper
//! can serve as a query (its curated keyword query, optionally with its
//! abstract) against all the other papers; a good reranker puts the query's
//! group-mates at the top. Precision is measured as P@k with k equal to the
//! number of group-mates.
//!
//! Fixtures are JSON lists. They can be produced from the plain-text paper
//! list with [`parse_raw_fixture`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{SearchRequest, WorkSummary};

/// Minimum P@k for a query to pass.
pub const P_THRESHOLD: f64 = 0.6;

/// Groups by inclusive index range.
pub const GROUPS: [(&str, u32, u32); 4] = [
    ("G1_01_07", 1, 7),
    ("G2_08_14", 8, 14),
    ("G3_15_20", 15, 20),
    ("G4_21_30", 21, 30),
];

/// Errors that can occur while loading or evaluating fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fixture JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Paper index falls outside every group
    #[error("Paper index out of supported ranges: id={id} index={index:?}")]
    Ungrouped { id: String, index: Option<u32> },

    /// A group cannot supply two query papers
    #[error("Group {group} has {count} papers, need at least 2")]
    GroupTooSmall { group: String, count: usize },
}

/// Result type for fixture operations.
pub type FixtureResult<T> = Result<T, FixtureError>;

/// One paper of a fixture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixturePaper {
    pub id: String,

    #[serde(default)]
    pub index: Option<u32>,

    #[serde(default)]
    pub title: String,

    /// Curated keyword query, e.g. `"MC + Nanonet + Channel Modeling (7)"`
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub publication_year: Option<i32>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: String,

    #[serde(default)]
    pub keywords: String,

    #[serde(default)]
    pub labels: Vec<String>,
}

impl FixturePaper {
    /// Index, falling back to the trailing digits of the id.
    pub fn effective_index(&self) -> Option<u32> {
        self.index.or_else(|| {
            let digits: String = self
                .id
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            digits.parse().ok()
        })
    }

    /// The paper as a rerank candidate.
    pub fn to_work(&self) -> WorkSummary {
        WorkSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            keywords: self.keywords.clone(),
            abstract_text: self.abstract_text.clone(),
            publication_year: self.publication_year,
            authors: Vec::new(),
        }
    }
}

/// Read a JSON fixture file.
pub fn load_fixture(path: &Path) -> FixtureResult<Vec<FixturePaper>> {
    let text = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

// Patterns are literals known to compile.
fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("fixture regex literal is valid"))
}

fn block_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\n-{10,}\n")
}

fn index_title() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*(\d+)\.\s*(.+?)\s*$")
}

fn query_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*Query:\s*(.+?)\s*$")
}

fn year_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*Year:\s*(\d{4})\b")
}

fn keywords_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*Keywords:\s*(.+?)\s*$")
}

fn label_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*Label:\s*(.+?)\s*$")
}

fn abstract_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*Abstract(?:\s*[:—-]\s*|\s+)(.*)\s*$")
}

fn section_stop() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?m)^\s*(Keywords:|Topics:|Concepts:|Label:|Note:)\s*")
}

fn clean(text: &str) -> String {
    text.replace('\r', "")
        .replace("&#13;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn capture(re: &Regex, block: &str) -> Option<String> {
    re.captures(block)
        .and_then(|c| c.get(1))
        .map(|m| clean(m.as_str()))
}

fn extract_abstract(block: &str) -> String {
    let Some(caps) = abstract_start().captures(block) else {
        return String::new();
    };
    let (Some(whole), Some(tail)) = (caps.get(0), caps.get(1)) else {
        return String::new();
    };

    let mut rest = &block[whole.end()..];
    if let Some(stop) = section_stop().find(rest) {
        rest = &rest[..stop.start()];
    }
    clean(&format!("{}\n{}", tail.as_str().trim(), rest))
}

fn parse_block(block: &str) -> Option<FixturePaper> {
    let caps = index_title().captures(block)?;
    let index: u32 = caps.get(1)?.as_str().parse().ok()?;
    let title = clean(caps.get(2)?.as_str());

    Some(FixturePaper {
        id: format!("birkan:{:02}", index),
        index: Some(index),
        title,
        query: capture(query_line(), block).unwrap_or_default(),
        publication_year: capture(year_line(), block).and_then(|y| y.parse().ok()),
        abstract_text: extract_abstract(block),
        keywords: capture(keywords_line(), block).unwrap_or_default(),
        labels: capture(label_line(), block)
            .map(|l| {
                l.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// Parse the plain-text paper list.
///
/// Blocks are separated by lines of ten or more dashes. A block needs an
/// `N. Title` line; `Query:`, `Year:`, `Keywords:`, `Label:` and an
/// `Abstract` section are optional. Papers come back sorted by index.
pub fn parse_raw_fixture(text: &str) -> Vec<FixturePaper> {
    let mut papers: Vec<FixturePaper> = block_split()
        .split(text)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .filter_map(parse_block)
        .collect();
    papers.sort_by_key(|p| p.index);
    papers
}

/// Split a curated query into keywords.
///
/// `"MC + Nanonet + Channel Modeling (7)"` gives `["MC", "Nanonet", "Channel Modeling"]`.
pub fn query_to_keywords(query: &str) -> Vec<String> {
    static COUNT_SUFFIX: OnceLock<Regex> = OnceLock::new();
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }
    let query = regex(&COUNT_SUFFIX, r"\(\s*\d+\s*\)\s*$").replace(query, "");
    query
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Group a paper belongs to.
pub fn paper_group(paper: &FixturePaper) -> FixtureResult<&'static str> {
    let index = paper.effective_index();
    index
        .and_then(|i| {
            GROUPS
                .iter()
                .find(|(_, lo, hi)| (*lo..=*hi).contains(&i))
                .map(|(name, _, _)| *name)
        })
        .ok_or_else(|| FixtureError::Ungrouped {
            id: paper.id.clone(),
            index,
        })
}

/// How a query paper is turned into a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryVariant {
    /// Keywords from the curated query only
    KwOnly,
    /// Keywords plus the paper's abstract
    KwPlusAbs,
}

impl QueryVariant {
    pub const ALL: [QueryVariant; 2] = [QueryVariant::KwOnly, QueryVariant::KwPlusAbs];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryVariant::KwOnly => "kw_only",
            QueryVariant::KwPlusAbs => "kw_plus_abs",
        }
    }
}

/// Build the request a query paper issues.
pub fn build_query(paper: &FixturePaper, variant: QueryVariant) -> SearchRequest {
    let abstracts = match variant {
        QueryVariant::KwOnly => Vec::new(),
        QueryVariant::KwPlusAbs => {
            let text = paper.abstract_text.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            }
        }
    };
    SearchRequest::new(query_to_keywords(&paper.query), abstracts)
}

/// All papers except the query paper, as candidates.
pub fn build_search_space(papers: &[FixturePaper], excluding_id: &str) -> Vec<WorkSummary> {
    papers
        .iter()
        .filter(|p| p.id != excluding_id)
        .map(FixturePaper::to_work)
        .collect()
}

/// Precision at k; zero when k is zero.
pub fn p_at_k(hits: usize, k: usize) -> f64 {
    if k == 0 {
        0.0
    } else {
        hits as f64 / k as f64
    }
}

/// Outcome of one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalRow {
    pub model: String,
    pub variant: QueryVariant,
    pub group: String,
    pub query_id: String,
    pub k: usize,
    pub hit_in_top_k: usize,
    pub missing_in_top_k: Vec<String>,
    pub p_at_k: f64,
    pub threshold: f64,
    pub pass: bool,
}

/// A validated fixture with precomputed group membership.
#[derive(Debug, Clone)]
pub struct Evaluator {
    papers: Vec<FixturePaper>,
    group_of: HashMap<String, &'static str>,
    group_sizes: HashMap<&'static str, usize>,
}

impl Evaluator {
    /// Validate that every paper belongs to a group.
    pub fn new(papers: Vec<FixturePaper>) -> FixtureResult<Self> {
        let mut group_of = HashMap::new();
        let mut group_sizes: HashMap<&'static str, usize> =
            GROUPS.iter().map(|(name, _, _)| (*name, 0)).collect();

        for paper in &papers {
            let group = paper_group(paper)?;
            group_of.insert(paper.id.clone(), group);
            *group_sizes.entry(group).or_default() += 1;
        }

        Ok(Self {
            papers,
            group_of,
            group_sizes,
        })
    }

    pub fn papers(&self) -> &[FixturePaper] {
        &self.papers
    }

    pub fn group_size(&self, group: &str) -> usize {
        self.group_sizes.get(group).copied().unwrap_or(0)
    }

    /// The first two papers of every group (by index, then title).
    pub fn query_papers(&self) -> FixtureResult<Vec<(&'static str, &FixturePaper)>> {
        let mut cases = Vec::new();
        for (group, _, _) in GROUPS {
            let mut members: Vec<&FixturePaper> = self
                .papers
                .iter()
                .filter(|p| self.group_of.get(&p.id) == Some(&group))
                .collect();
            if members.len() < 2 {
                return Err(FixtureError::GroupTooSmall {
                    group: group.to_string(),
                    count: members.len(),
                });
            }
            members.sort_by(|a, b| {
                (a.effective_index(), &a.title).cmp(&(b.effective_index(), &b.title))
            });
            cases.extend(members.into_iter().take(2).map(|p| (group, p)));
        }
        Ok(cases)
    }

    /// k for a query from `group`: its group-mates, capped by the result count.
    pub fn dynamic_k(&self, group: &str, returned_len: usize) -> usize {
        let relevant = self.group_size(group).saturating_sub(1);
        relevant.min(returned_len)
    }

    /// Score a reranked result list for one query.
    pub fn evaluate(
        &self,
        model: &str,
        variant: QueryVariant,
        group: &str,
        query_id: &str,
        results: &[WorkSummary],
    ) -> EvalRow {
        let k = self.dynamic_k(group, results.len());
        let top: Vec<&str> = results.iter().take(k).map(|w| w.id.as_str()).collect();

        let hits = top
            .iter()
            .filter(|id| self.group_of.get(**id).copied() == Some(group))
            .count();

        let missing = if k == 0 {
            Vec::new()
        } else {
            let top: HashSet<&str> = top.iter().copied().collect();
            let mut missing: Vec<String> = self
                .papers
                .iter()
                .filter(|p| p.id != query_id)
                .filter(|p| self.group_of.get(&p.id).copied() == Some(group))
                .filter(|p| !top.contains(p.id.as_str()))
                .map(|p| p.id.clone())
                .collect();
            missing.sort();
            missing
        };

        let precision = p_at_k(hits, k);
        EvalRow {
            model: model.to_string(),
            variant,
            group: group.to_string(),
            query_id: query_id.to_string(),
            k,
            hit_in_top_k: hits,
            missing_in_top_k: missing,
            p_at_k: precision,
            threshold: P_THRESHOLD,
            pass: precision >= P_THRESHOLD,
        }
    }
}
