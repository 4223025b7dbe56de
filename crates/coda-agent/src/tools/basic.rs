//! Built-in conversational tools: time, date, jokes, and introspection.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::Local;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};

use coda_memory::MemoryService;

use crate::tools::{DescribeFormat, ToolError, ToolRouter, ToolSpec};

pub fn current_time_reply() -> String {
    Local::now().format("It's %H:%M.").to_string()
}

pub fn current_date_reply() -> String {
    Local::now().format("Today is %A, %B %d, %Y.").to_string()
}

const JOKES: &[&str] = &[
    "Why don't scientists trust atoms? Because they make up everything!",
    "Why did the scarecrow win an award? Because he was outstanding in his field!",
    "Why don't skeletons fight each other? They don't have the guts!",
    "What do you call a fake noodle? An impasta!",
    "How does a penguin build its house? Igloos it together!",
    "Why did the bicycle fall over? Because it was two-tired!",
    "What's orange and sounds like a parrot? A carrot!",
    "Why can't you give Elsa a balloon? Because she will let it go!",
    "What do you call a bear with no teeth? A gummy bear!",
    "Why did the golfer bring two pairs of pants? In case he got a hole in one!",
];

fn tell_joke() -> String {
    JOKES
        .choose(&mut rand::thread_rng())
        .unwrap_or(&JOKES[0])
        .to_string()
}

fn list_memory_files(memory_dir: &PathBuf) -> String {
    let Ok(entries) = std::fs::read_dir(memory_dir) else {
        return "No memory directory found.".to_string();
    };
    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(".json"))
        .collect();
    files.sort();

    if files.is_empty() {
        return "No memory files found.".to_string();
    }
    let count = files.len();
    let listed = files
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if count > 5 {
        format!("{count} memory files found. Most recent: {listed}...")
    } else {
        format!("{count} memory files found: {listed}")
    }
}

fn count_conversation_turns(memory: &MemoryService) -> String {
    match memory.turn_count() {
        0 => "We haven't had any conversation turns yet.".to_string(),
        1 => "We've had 1 turn in this conversation.".to_string(),
        n => format!("We've had {n} turns in this conversation."),
    }
}

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn parse_format(args: &Map<String, Value>) -> DescribeFormat {
    match arg_str(args, "format") {
        Some("markdown") => DescribeFormat::Markdown,
        Some("json") => DescribeFormat::Json,
        _ => DescribeFormat::Text,
    }
}

/// Register the basic tool set.
///
/// `list_tools` and `show_capabilities` introspect the router itself,
/// held through a `Weak` so the registry does not own itself.
pub fn register_basic(
    router: &Arc<ToolRouter>,
    memory: Arc<MemoryService>,
    memory_dir: PathBuf,
) -> Result<(), ToolError> {
    router.register(
        ToolSpec::new(
            "get_time",
            "Get the current time",
            Arc::new(|_args| current_time_reply()),
        )
        .aliases(&["get_system_time", "time", "current_time"])
        .category("Time & Date")
        .example("What time is it?"),
    )?;

    router.register(
        ToolSpec::new(
            "get_date",
            "Get the current date",
            Arc::new(|_args| current_date_reply()),
        )
        .aliases(&["get_system_date", "date", "current_date"])
        .category("Time & Date")
        .example("What's today's date?"),
    )?;

    router.register(
        ToolSpec::new(
            "tell_joke",
            "Tell a random joke",
            Arc::new(|_args| tell_joke()),
        )
        .aliases(&["joke", "tell_a_joke"])
        .category("Entertainment")
        .example("Tell me a joke"),
    )?;

    router.register(
        ToolSpec::new(
            "list_memory_files",
            "List memory files in the data directory",
            Arc::new(move |_args| list_memory_files(&memory_dir)),
        )
        .aliases(&["memory_files", "list_files"])
        .category("Memory")
        .example("Show me my memory files"),
    )?;

    let mem = Arc::clone(&memory);
    router.register(
        ToolSpec::new(
            "count_conversation_turns",
            "Count the number of turns in the current conversation",
            Arc::new(move |_args| count_conversation_turns(&mem)),
        )
        .aliases(&["count_turns", "conversation_turns"])
        .category("Memory")
        .example("How many turns have we had in this conversation?"),
    )?;

    let weak: Weak<ToolRouter> = Arc::downgrade(router);
    router.register(
        ToolSpec::new(
            "list_tools",
            "List all available tools and their descriptions",
            Arc::new(move |args| match weak.upgrade() {
                Some(router) => {
                    router.describe_tools(arg_str(args, "category"), parse_format(args))
                }
                None => "Tool router not available.".to_string(),
            }),
        )
        .aliases(&["show_tools", "available_tools"])
        .category("Help")
        .example("What tools do you have?"),
    )?;

    let weak: Weak<ToolRouter> = Arc::downgrade(router);
    router.register(
        ToolSpec::new(
            "show_capabilities",
            "Show what Coda can do and how to interact with it",
            Arc::new(move |args| {
                let basic = "I can help you with various tasks including:\n\n\
- Answering questions and providing information\n\
- Getting the current time and date\n\
- Telling jokes\n\
- Remembering our conversation\n\
- Executing various tools and functions\n\n\
You can ask me to list all my tools by saying 'What can you do?'";
                match arg_str(args, "detail_level") {
                    Some("detailed") | Some("examples") => match weak.upgrade() {
                        Some(router) => format!(
                            "{basic}\n\n{}",
                            router.describe_tools(None, DescribeFormat::Markdown)
                        ),
                        None => basic.to_string(),
                    },
                    _ => basic.to_string(),
                }
            }),
        )
        .aliases(&["capabilities", "what_can_you_do", "help"])
        .category("Help")
        .example("What can you do?"),
    )?;

    Ok(())
}
