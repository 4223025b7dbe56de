use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::types::{MemoryRecord, MemorySource};

#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Clusters smaller than this are dropped from summaries.
    pub min_cluster_size: usize,
    /// Jaccard overlap at which two topics merge into one cluster.
    pub similarity_threshold: f64,
    /// Cap on topic names in a merged cluster's label.
    pub max_topics_per_cluster: usize,
    pub max_summary_length: usize,
    pub cache_ttl: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            similarity_threshold: 0.7,
            max_topics_per_cluster: 5,
            max_summary_length: 600,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Topic clustering and cluster summaries over the long-term record set.
///
/// Clustering is recomputed lazily and cached; any store mutation must go
/// through [`TopicClusters::invalidate`].
pub struct TopicClusters {
    config: TopicConfig,
    cache: Mutex<Option<(Instant, BTreeMap<String, Vec<MemoryRecord>>)>>,
}

impl TopicClusters {
    pub fn new(config: TopicConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(None),
        }
    }

    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    /// Cluster records by topic: drop singleton topics, merge topics whose
    /// record sets overlap above the Jaccard threshold, keep clusters at
    /// `min_cluster_size` or larger.
    pub fn cluster(&self, records: &[MemoryRecord]) -> BTreeMap<String, Vec<MemoryRecord>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some((built, clusters)) = cache.as_ref() {
                if built.elapsed() < self.config.cache_ttl {
                    return clusters.clone();
                }
            }
        }

        let clusters = self.build_clusters(records);
        *self.cache.lock().unwrap() = Some((Instant::now(), clusters.clone()));
        info!(clusters = clusters.len(), "rebuilt topic clusters");
        clusters
    }

    fn build_clusters(&self, records: &[MemoryRecord]) -> BTreeMap<String, Vec<MemoryRecord>> {
        // topic → member record ids
        let mut topic_members: HashMap<&str, HashSet<&str>> = HashMap::new();
        let by_id: HashMap<&str, &MemoryRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        for rec in records {
            for topic in &rec.topics {
                topic_members
                    .entry(topic.as_str())
                    .or_default()
                    .insert(rec.id.as_str());
            }
        }

        // Rare topics (a single record) say nothing worth clustering.
        topic_members.retain(|_, members| members.len() > 1);

        // Greedy merge, highest overlap first.
        let topics: Vec<&str> = {
            let mut t: Vec<&str> = topic_members.keys().copied().collect();
            t.sort();
            t
        };
        let mut pairs: Vec<(f64, &str, &str)> = Vec::new();
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                let ma = &topic_members[a];
                let mb = &topic_members[b];
                let inter = ma.intersection(mb).count();
                let union = ma.union(mb).count();
                if union > 0 {
                    let jaccard = inter as f64 / union as f64;
                    if jaccard >= self.config.similarity_threshold {
                        pairs.push((jaccard, *a, *b));
                    }
                }
            }
        }
        pairs.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap_or(std::cmp::Ordering::Equal));

        // Union-find over topic names.
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<&str>> = Vec::new();
        for &(_, a, b) in &pairs {
            match (group_of.get(a).copied(), group_of.get(b).copied()) {
                (None, None) => {
                    groups.push(vec![a, b]);
                    group_of.insert(a, groups.len() - 1);
                    group_of.insert(b, groups.len() - 1);
                }
                (Some(g), None) => {
                    groups[g].push(b);
                    group_of.insert(b, g);
                }
                (None, Some(g)) => {
                    groups[g].push(a);
                    group_of.insert(a, g);
                }
                (Some(ga), Some(gb)) if ga != gb => {
                    let moved = std::mem::take(&mut groups[gb]);
                    for &t in &moved {
                        group_of.insert(t, ga);
                    }
                    groups[ga].extend(moved);
                }
                _ => {}
            }
        }
        for &topic in &topics {
            if !group_of.contains_key(topic) {
                groups.push(vec![topic]);
            }
        }

        // Materialize clusters with readable labels and deduped members.
        let mut out = BTreeMap::new();
        for group in groups.into_iter().filter(|g| !g.is_empty()) {
            let label: String = group
                .iter()
                .take(self.config.max_topics_per_cluster)
                .copied()
                .collect::<Vec<_>>()
                .join(", ");
            let mut seen = HashSet::new();
            let mut members: Vec<MemoryRecord> = Vec::new();
            for topic in &group {
                for id in &topic_members[*topic] {
                    if seen.insert(*id) {
                        if let Some(rec) = by_id.get(id) {
                            members.push((*rec).clone());
                        }
                    }
                }
            }
            if members.len() >= self.config.min_cluster_size {
                out.insert(label, members);
            }
        }
        out
    }

    /// Header + per-type counts + top records by importance.
    pub fn summarize_cluster(&self, label: &str, members: &[MemoryRecord]) -> String {
        let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();
        for rec in members {
            *type_counts.entry(rec.source_type.to_string()).or_insert(0) += 1;
        }
        let counts = type_counts
            .iter()
            .map(|(t, n)| format!("{n} {t}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sorted: Vec<&MemoryRecord> = members.iter().collect();
        sorted.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut summary = format!(
            "Topic: {label}\nContains {} memories ({counts})\nKey points:\n",
            members.len()
        );
        for rec in sorted.iter().take(5) {
            summary.push_str(&format!("- {}\n", clip(&rec.content, 100)));
        }

        if summary.chars().count() > self.config.max_summary_length {
            summary = clip(&summary, self.config.max_summary_length);
        }
        summary
    }

    /// Summaries for every cluster.
    pub fn topic_summaries(&self, records: &[MemoryRecord]) -> BTreeMap<String, String> {
        let clusters = self.cluster(records);
        let mut out = BTreeMap::new();
        for (label, members) in &clusters {
            out.insert(label.clone(), self.summarize_cluster(label, members));
        }
        debug!(summaries = out.len(), "generated topic summaries");
        out
    }

    /// Profile of the user assembled from preference and personal-fact
    /// records plus the cluster labels.
    pub fn user_profile(&self, records: &[MemoryRecord]) -> Value {
        let preferences: Vec<&str> = records
            .iter()
            .filter(|r| r.source_type == MemorySource::Preference)
            .map(|r| r.content.as_str())
            .collect();
        let personal_facts: Vec<&str> = records
            .iter()
            .filter(|r| {
                r.source_type == MemorySource::Fact
                    && r.topics.iter().any(|t| t == "personal" || t == "name")
            })
            .map(|r| r.content.as_str())
            .collect();

        let mut memory_counts: BTreeMap<String, usize> = BTreeMap::new();
        for rec in records {
            *memory_counts.entry(rec.source_type.to_string()).or_insert(0) += 1;
        }

        let clusters = self.cluster(records);
        json!({
            "preferences": preferences,
            "personal_facts": personal_facts,
            "topics_of_interest": clusters.keys().collect::<Vec<_>>(),
            "memory_counts": memory_counts,
            "generated_at": chrono::Utc::now(),
        })
    }
}

/// Truncate at a char boundary, appending an ellipsis.
fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
