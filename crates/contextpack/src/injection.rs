/// Format one prompt section with machine-inspectable delimiters, mirroring
/// the workspace-file injection format this builder was adapted from.
pub fn format_section(name: &str, content: &str, raw_chars: usize, truncated: bool) -> String {
    let injected_chars = content.len();
    format!(
        "\
=== SECTION: {name} ===
RAW_CHARS: {raw_chars}
INJECTED_CHARS: {injected_chars}
TRUNCATED: {truncated}
--- BEGIN ---
{content}
--- END ---
"
    )
}

/// Format the tool-list section (one line per allowed tool name).
pub fn format_tool_list(tool_names: &[String]) -> String {
    let body = if tool_names.is_empty() {
        "(no tools available in this goal)".to_string()
    } else {
        tool_names
            .iter()
            .map(|n| format!("- {n}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "\
=== SECTION: tools ===
--- BEGIN ---
{body}
--- END ---
"
    )
}
