//! Tool summaries for LLM prompts.
//!
//! Renders the registered tool set as markdown so the code-gen and
//! planning layers can describe the available surface to the model in a
//! compact, stable format.

use super::registry::RegistrySnapshot;

/// Markdown description of every tool with its argument schema.
pub fn schema_text(snapshot: &RegistrySnapshot) -> String {
    let mut output = String::from("# Available tools\n\n");

    if snapshot.is_empty() {
        output += "*No tools available.*\n";
        return output;
    }

    for tool in snapshot.iter() {
        output += &format!("## {}\n{}\n", tool.name, tool.description);
        if tool.args.is_empty() {
            output += "No arguments.\n\n";
            continue;
        }
        output += "Arguments:\n";
        for (name, arg) in &tool.args {
            let required = if arg.required { "required" } else { "optional" };
            output += &format!("- `{name}` ({:?}, {required}): {}\n", arg.kind, arg.description);
        }
        output.push('\n');
    }

    output
}

/// One-line tool list for token-constrained prompts.
pub fn summary_line(snapshot: &RegistrySnapshot) -> String {
    if snapshot.is_empty() {
        return "No tools available.".to_string();
    }
    let names: Vec<&str> = snapshot.iter().map(|t| t.name.as_str()).collect();
    format!("Available tools: {}", names.join(", "))
}
