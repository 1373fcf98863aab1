//! LLM-driven clustering of sources into ordered, titled collections.

use crate::config::Prompts;
use crate::error::{PanelistError, Result};
use crate::llm::{Chain, LlmClient, DEFAULT_PARSE_RETRIES};
use crate::models::{md5_hex, WebSource, WebSourceCollection};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Title of the group that collects ids the model left out.
pub const REMAINING_TITLE: &str = "Remaining sources";
/// Share of ids the model may leave out before the answer is rejected.
pub const MAX_MISSING_RATIO: f64 = 0.2;

const GROUPING_ATTEMPTS: usize = 2;

/// Knobs for one grouping call.
#[derive(Debug, Clone)]
pub struct GroupingOptions {
    pub guidance: String,
    pub min_groups: usize,
    pub max_ids_per_group: usize,
    pub previous_episode: Option<String>,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            guidance: String::new(),
            min_groups: 1,
            max_ids_per_group: 5,
            previous_episode: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupingAnswer {
    ordered_groups: Vec<Vec<String>>,
    #[serde(default)]
    main_group: Option<i64>,
}

/// Groups in broadcast order plus the index of the main group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    pub groups: Vec<Vec<String>>,
    pub main_group: usize,
    /// Whether the last group is the appended remainder.
    pub has_remainder: bool,
}

/// Drop duplicate sorting ids (first wins) and sort oldest first, undated last.
pub fn prepare_sources(sources: Vec<WebSource>) -> Vec<WebSource> {
    let mut seen = HashSet::new();
    let mut unique: Vec<WebSource> = sources
        .into_iter()
        .filter(|s| seen.insert(s.sorting_id()))
        .collect();
    unique.sort_by(|a, b| match (a.publish_date, b.publish_date) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    unique
}

/// Pre-cluster sources that link to each other from their feed summaries.
/// Only clusters of two or more are returned, as sorting ids.
pub fn link_groups(sources: &[WebSource]) -> Vec<Vec<String>> {
    let ids: Vec<String> = sources.iter().map(WebSource::sorting_id).collect();
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    let mut parent: Vec<usize> = (0..sources.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for (i, source) in sources.iter().enumerate() {
        for url in &source.linked_items {
            if let Some(&j) = index.get(md5_hex(url).as_str()) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut clusters: Vec<(usize, Vec<String>)> = Vec::new();
    for i in 0..sources.len() {
        let root = find(&mut parent, i);
        match clusters.iter_mut().find(|(r, _)| *r == root) {
            Some((_, members)) => members.push(ids[i].clone()),
            None => clusters.push((root, vec![ids[i].clone()])),
        }
    }
    clusters
        .into_iter()
        .map(|(_, members)| members)
        .filter(|members| members.len() > 1)
        .collect()
}

fn items_block(sources: &[WebSource]) -> String {
    sources
        .iter()
        .map(|s| {
            let detail = match (&s.description, s.linked_items.is_empty()) {
                (Some(d), _) if !d.trim().is_empty() => d.trim().to_string(),
                (_, false) => format!("links: {}", s.linked_items.join(", ")),
                _ => String::new(),
            };
            format!(
                "- id: {} | categories: {} | title: {} | {}",
                s.sorting_id(),
                s.categories.join(", "),
                s.title,
                detail
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Check a model answer against the known ids. Unknown ids are dropped,
/// duplicates are an error, and a small number of missing ids are appended
/// as a final remainder group.
fn validate_answer(answer: GroupingAnswer, known: &[String]) -> Result<GroupPlan> {
    let known_set: HashSet<&str> = known.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut groups: Vec<Vec<String>> = Vec::new();

    for group in answer.ordered_groups {
        let mut kept = Vec::new();
        for id in group {
            let id = id.trim().to_string();
            if !known_set.contains(id.as_str()) {
                warn!("Grouping returned unknown id {}", id);
                continue;
            }
            if !seen.insert(id.clone()) {
                return Err(PanelistError::Grouping(format!("Id {} appears more than once", id)));
            }
            kept.push(id);
        }
        if !kept.is_empty() {
            groups.push(kept);
        }
    }

    let missing: Vec<String> = known.iter().filter(|id| !seen.contains(*id)).cloned().collect();
    if missing.len() as f64 > known.len() as f64 * MAX_MISSING_RATIO {
        return Err(PanelistError::Grouping(format!(
            "{} of {} ids missing from the grouping",
            missing.len(),
            known.len()
        )));
    }
    if groups.is_empty() {
        return Err(PanelistError::Grouping("No groups returned".to_string()));
    }

    let main_group = answer
        .main_group
        .and_then(|m| usize::try_from(m).ok())
        .filter(|m| *m < groups.len())
        .unwrap_or(0);
    let has_remainder = !missing.is_empty();
    if has_remainder {
        warn!("{} ids missing from grouping, appending a remainder group", missing.len());
        groups.push(missing);
    }
    Ok(GroupPlan {
        groups,
        main_group,
        has_remainder,
    })
}

/// Build collections from a plan. Children newest first; the main group is flagged.
pub fn materialize(plan: &GroupPlan, sources: &[WebSource], max_amount: usize) -> Vec<WebSourceCollection> {
    let by_id: HashMap<String, &WebSource> = sources.iter().map(|s| (s.sorting_id(), s)).collect();
    let last = plan.groups.len().saturating_sub(1);

    plan.groups
        .iter()
        .enumerate()
        .map(|(i, ids)| {
            let mut collection = WebSourceCollection::new("", max_amount);
            for id in ids {
                if let Some(source) = by_id.get(id) {
                    collection.push((*source).clone());
                }
            }
            collection.filter_duplicates();
            collection.sort_newest_first();
            collection.inherit_image();
            collection.collect_categories();
            collection.main_item = i == plan.main_group;
            collection.title = if plan.has_remainder && i == last {
                REMAINING_TITLE.to_string()
            } else {
                collection
                    .web_sources
                    .first()
                    .map(|s| s.title.clone())
                    .unwrap_or_default()
            };
            collection.topic = collection.categories.first().cloned();
            collection
        })
        .collect()
}

pub struct GroupingEngine {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    parse_retries: u32,
}

impl GroupingEngine {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self {
            llm,
            prompts,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    async fn ask(&self, sources: &[WebSource], options: &GroupingOptions) -> Result<GroupingAnswer> {
        let links = link_groups(sources);
        let link_text = if links.is_empty() {
            "(none)".to_string()
        } else {
            links
                .iter()
                .map(|g| format!("- [{}]", g.join(", ")))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let vars = HashMap::from([
            ("max_ids_per_group".to_string(), options.max_ids_per_group.to_string()),
            ("min_groups".to_string(), options.min_groups.to_string()),
            (
                "guidance".to_string(),
                if options.guidance.trim().is_empty() {
                    "none".to_string()
                } else {
                    options.guidance.clone()
                },
            ),
            (
                "previous_episode".to_string(),
                options.previous_episode.clone().unwrap_or_else(|| "(none)".to_string()),
            ),
            ("link_groups".to_string(), link_text),
            ("items".to_string(), items_block(sources)),
        ]);
        Chain::from_prompts("grouping", self.llm.clone(), &self.prompts, &self.prompts.grouping, &vars)
            .json()
            .with_temperature(0.0)
            .with_parse_retries(self.parse_retries)
            .invoke_json()
            .await
    }

    /// Cluster and order sources. One retry on an invalid answer, then fail.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn group(
        &self,
        sources: Vec<WebSource>,
        options: &GroupingOptions,
    ) -> Result<Vec<WebSourceCollection>> {
        let sources = prepare_sources(sources);
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = sources.iter().map(WebSource::sorting_id).collect();

        if sources.len() == 1 {
            let plan = GroupPlan {
                groups: vec![ids],
                main_group: 0,
                has_remainder: false,
            };
            return Ok(materialize(&plan, &sources, options.max_ids_per_group));
        }

        for attempt in 1..=GROUPING_ATTEMPTS {
            let outcome = match self.ask(&sources, options).await {
                Ok(answer) => validate_answer(answer, &ids),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(plan) => {
                    info!(
                        "Grouped {} sources into {} groups (main: {})",
                        sources.len(),
                        plan.groups.len(),
                        plan.main_group
                    );
                    return Ok(materialize(&plan, &sources, options.max_ids_per_group));
                }
                Err(e) if e.is_rate_limit() => return Err(e),
                Err(e) => warn!("Grouping attempt {} failed: {}", attempt, e),
            }
        }
        Err(PanelistError::Grouping("Unable to sort news sources".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLlm;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn sources(n: usize) -> Vec<WebSource> {
        (0..n)
            .map(|i| {
                let mut s = WebSource::new(format!("Story {}", i), format!("https://news.test/{}", i), "News");
                s.publish_date = Some(Utc::now() - Duration::hours(i as i64));
                s.image = (i == 2).then(|| "https://news.test/2.jpg".to_string());
                s
            })
            .collect()
    }

    fn id(i: usize) -> String {
        md5_hex(&format!("https://news.test/{}", i))
    }

    fn engine(llm: Arc<MockLlm>) -> GroupingEngine {
        GroupingEngine::new(llm, Arc::new(Prompts::default()))
    }

    #[tokio::test]
    async fn test_groups_in_model_order_with_main_item() {
        let llm = Arc::new(MockLlm::new());
        llm.push(
            "grouping",
            json!({"ordered_groups": [[id(2)], [id(0), id(1)]], "main_group": 1}).to_string(),
        );
        let groups = engine(llm.clone())
            .group(sources(3), &GroupingOptions::default())
            .await
            .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].title, "Story 2");
        assert_eq!(groups[0].image.as_deref(), Some("https://news.test/2.jpg"));
        assert!(groups[1].main_item && !groups[0].main_item);
        // Newest first inside a group.
        assert_eq!(groups[1].web_sources[0].title, "Story 0");

        let prompt = llm.requests("grouping")[0].user_prompt().to_string();
        assert!(prompt.contains(&id(1)));
    }

    #[tokio::test]
    async fn test_small_gap_becomes_remainder_group() {
        let llm = Arc::new(MockLlm::new());
        let groups: Vec<Vec<String>> = (0..9).map(|i| vec![id(i)]).collect();
        llm.push("grouping", json!({"ordered_groups": groups, "main_group": 0}).to_string());

        let collections = engine(llm).group(sources(10), &GroupingOptions::default()).await.unwrap();
        assert_eq!(collections.len(), 10);
        assert_eq!(collections.last().unwrap().title, REMAINING_TITLE);
        assert_eq!(collections.last().unwrap().web_sources[0].original_url, "https://news.test/9");
    }

    #[tokio::test]
    async fn test_duplicates_retry_once_then_fail() {
        let llm = Arc::new(MockLlm::new());
        let bad = json!({"ordered_groups": [[id(0), id(1)], [id(1)]], "main_group": 0}).to_string();
        llm.push("grouping", bad.clone());
        llm.push("grouping", bad);

        let err = engine(llm.clone())
            .group(sources(2), &GroupingOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unable to sort news sources"));
        assert_eq!(llm.count("grouping"), 2);
    }

    #[tokio::test]
    async fn test_second_attempt_can_succeed() {
        let llm = Arc::new(MockLlm::new());
        llm.push("grouping", json!({"ordered_groups": [[id(0)]]}).to_string());
        llm.push("grouping", json!({"ordered_groups": [[id(0)], [id(1)]]}).to_string());

        let groups = engine(llm).group(sources(2), &GroupingOptions::default()).await.unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn test_single_source_skips_model() {
        let llm = Arc::new(MockLlm::new());
        let groups = engine(llm.clone()).group(sources(1), &GroupingOptions::default()).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].main_item);
        assert_eq!(llm.count("grouping"), 0);
    }

    #[test]
    fn test_link_groups_and_prepare() {
        let mut items = sources(4);
        items[0].linked_items = vec!["https://news.test/3".to_string()];
        items[3].linked_items = vec!["https://other.test/x".to_string()];
        let clusters = link_groups(&items);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);

        let mut dupes = sources(2);
        dupes.push(WebSource::new("Again", "https://news.test/0", "News"));
        let prepared = prepare_sources(dupes);
        assert_eq!(prepared.len(), 2);
        // Oldest first.
        assert_eq!(prepared[0].title, "Story 1");
    }
}
