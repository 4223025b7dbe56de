//! Tools that expose the memory subsystem to the LLM.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::warn;

use coda_memory::MemoryService;

use crate::tools::{ToolError, ToolRouter, ToolSpec};

fn get_memory_stats(memory: &MemoryService) -> String {
    let duration = memory.session_duration_seconds() as u64;
    let (hours, rem) = (duration / 3600, duration % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    let duration_str = if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    };

    let mut out = format!(
        "Session duration: {duration_str}\nConversation turns: {}\n",
        memory.turn_count()
    );

    if memory.long_term_enabled() {
        let stats = memory.memory_stats();
        let long = &stats["long_term"];
        out.push_str(&format!(
            "\nLong-term memories: {}\n",
            long["total_memories"]
        ));
        if let Some(types) = long["source_types"].as_object() {
            if !types.is_empty() {
                out.push_str("Memory types:\n");
                for (source, count) in types {
                    out.push_str(&format!("- {source}: {count}\n"));
                }
            }
        }
        out.push_str(&format!("Known topics: {}\n", long["topic_count"]));
    }
    out
}

fn add_fact(memory: &MemoryService, args: &Map<String, Value>) -> String {
    let Some(fact) = args.get("fact").and_then(Value::as_str) else {
        return "Error: add_fact requires a 'fact' argument.".to_string();
    };
    let importance = args.get("importance").and_then(Value::as_f64);
    match memory.add_fact(fact, importance) {
        Ok(_) => format!("I've remembered that {fact}"),
        Err(e) => {
            warn!(error = %e, "add_fact failed");
            format!("Error adding fact: {e}")
        }
    }
}

fn add_preference(memory: &MemoryService, args: &Map<String, Value>) -> String {
    let Some(preference) = args.get("preference").and_then(Value::as_str) else {
        return "Error: add_preference requires a 'preference' argument.".to_string();
    };
    match memory.add_preference(preference) {
        Ok(_) => format!("I've noted your preference: {preference}"),
        Err(e) => {
            warn!(error = %e, "add_preference failed");
            format!("Error adding preference: {e}")
        }
    }
}

fn get_user_summary(memory: &MemoryService) -> String {
    let Some(profile) = memory.user_summary() else {
        return "Long-term memory is not enabled.".to_string();
    };

    let preferences = profile["preferences"].as_array().cloned().unwrap_or_default();
    let facts = profile["personal_facts"].as_array().cloned().unwrap_or_default();
    if preferences.is_empty() && facts.is_empty() {
        return "I don't have much information about you yet.".to_string();
    }

    let mut out = String::from("Here's what I know about you:\n\n");
    if !facts.is_empty() {
        out.push_str("Facts:\n");
        for f in &facts {
            out.push_str(&format!("- {}\n", f.as_str().unwrap_or_default()));
        }
    }
    if !preferences.is_empty() {
        out.push_str("Preferences:\n");
        for p in &preferences {
            out.push_str(&format!("- {}\n", p.as_str().unwrap_or_default()));
        }
    }
    if let Some(topics) = profile["topics_of_interest"].as_array() {
        if !topics.is_empty() {
            let names: Vec<&str> = topics.iter().filter_map(Value::as_str).collect();
            out.push_str(&format!("Topics we talk about: {}\n", names.join(", ")));
        }
    }
    out
}

fn search_memories(memory: &MemoryService, args: &Map<String, Value>) -> String {
    let Some(query) = args.get("query").and_then(Value::as_str) else {
        return "Error: search_memories requires a 'query' argument.".to_string();
    };
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(3)
        .clamp(1, 10) as usize;

    match memory.search(query, limit) {
        Ok(hits) if hits.is_empty() => {
            format!("I couldn't find any memories related to '{query}'.")
        }
        Ok(hits) => {
            let mut out = format!("Here's what I remember about '{query}':\n\n");
            for (i, hit) in hits.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {} (relevance: {:.2})\n",
                    i + 1,
                    hit.content,
                    hit.similarity
                ));
            }
            out
        }
        Err(e) => {
            warn!(error = %e, "search_memories failed");
            format!("Error searching memories: {e}")
        }
    }
}

fn forget_session(memory: &MemoryService) -> String {
    memory.reset_short_term();
    "I've forgotten our current conversation. What would you like to talk about?".to_string()
}

/// Register the memory tool set.
pub fn register_memory_tools(
    router: &ToolRouter,
    memory: Arc<MemoryService>,
) -> Result<(), ToolError> {
    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "get_memory_stats",
            "Get statistics about the memory system",
            Arc::new(move |_args| get_memory_stats(&mem)),
        )
        .aliases(&["memory_stats"])
        .category("Memory")
        .example("How much do you remember?"),
    )?;

    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "add_fact",
            "Add a fact to long-term memory",
            Arc::new(move |args| add_fact(&mem, args)),
        )
        .aliases(&["remember_fact"])
        .category("Memory")
        .example("Remember that my birthday is on May 15th")
        .parameters(json!({
            "fact": { "type": "string", "required": true },
            "importance": { "type": "number", "required": false },
        })),
    )?;

    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "add_preference",
            "Add a user preference to long-term memory",
            Arc::new(move |args| add_preference(&mem, args)),
        )
        .aliases(&["remember_preference"])
        .category("Memory")
        .example("Remember that I prefer concise responses")
        .parameters(json!({
            "preference": { "type": "string", "required": true },
        })),
    )?;

    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "get_user_summary",
            "Get a summary of what Coda knows about the user",
            Arc::new(move |_args| get_user_summary(&mem)),
        )
        .aliases(&["user_summary", "about_me"])
        .category("Memory")
        .example("What do you know about me?"),
    )?;

    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "search_memories",
            "Search long-term memories",
            Arc::new(move |args| search_memories(&mem, args)),
        )
        .aliases(&["recall"])
        .category("Memory")
        .example("What do you remember about my hobbies?")
        .parameters(json!({
            "query": { "type": "string", "required": true },
            "limit": { "type": "integer", "required": false },
        })),
    )?;

    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "forget_session",
            "Forget the current session (reset short-term memory)",
            Arc::new(move |_args| forget_session(&mem)),
        )
        .aliases(&["forget_conversation"])
        .category("Memory")
        .example("Forget this conversation"),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_memory::service::MemoryServiceConfig;

    fn setup() -> (ToolRouter, Arc<MemoryService>) {
        let router = ToolRouter::new();
        let memory = Arc::new(
            MemoryService::open(MemoryServiceConfig {
                min_similarity: 0.0,
                ..MemoryServiceConfig::default()
            })
            .unwrap(),
        );
        register_memory_tools(&router, Arc::clone(&memory)).unwrap();
        (router, memory)
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn add_then_search_round_trip() {
        let (router, _) = setup();
        let reply = router.execute(
            "add_fact",
            &args(&[("fact", json!("my cat is named Turing"))]),
        );
        assert!(reply.contains("Turing"));

        let reply = router.execute(
            "search_memories",
            &args(&[("query", json!("what is my cat named"))]),
        );
        assert!(reply.contains("Turing"));
        assert!(reply.contains("relevance"));
    }

    #[test]
    fn missing_arguments_are_reported_not_raised() {
        let (router, _) = setup();
        assert!(router
            .execute("add_fact", &Map::new())
            .starts_with("Error: add_fact requires"));
        assert!(router
            .execute("search_memories", &Map::new())
            .starts_with("Error: search_memories requires"));
    }

    #[test]
    fn forget_session_resets_turns() {
        let (router, memory) = setup();
        memory.add_turn(coda_core::types::Role::User, "hello");
        assert_eq!(memory.turn_count(), 1);
        router.execute("forget_session", &Map::new());
        assert_eq!(memory.turn_count(), 0);
    }

    #[test]
    fn stats_mention_long_term_counts() {
        let (router, memory) = setup();
        memory.add_fact("The user plays chess", None).unwrap();
        let reply = router.execute("get_memory_stats", &Map::new());
        assert!(reply.contains("Long-term memories: 1"));
        assert!(reply.contains("fact: 1"));
    }
}
