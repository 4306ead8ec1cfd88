//! Fixed text used by auto-compaction.

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant tasked with summarizing conversations.";

pub const COMPRESSION_NOTICE: &str =
    "Context automatically compressed due to token limit. Essential information preserved.";

pub const CONTINUE_PROMPT: &str = "Please continue the conversation from where we left it off \
without asking the user any further questions. Continue with the last task that you were asked \
to work on.";

/// Appended after the conversation to request the summary.
pub const SUMMARY_REQUEST: &str = "\
Your task is to create a detailed summary of the conversation so far. This summary will replace \
the conversation, so it must capture everything needed to continue the work without losing \
context.

Organize the summary under exactly these headings:

1. Technical Context: languages, frameworks, tools, versions and environment details in use.
2. Project Overview: what is being built and why, and the user's overall goal.
3. Code Changes: files created or modified, with the essential code snippets and what each \
change does.
4. Debugging & Issues: errors encountered, their causes, and how each was resolved or what was \
tried.
5. Current Status: what was being worked on immediately before this summary, as precisely as \
possible.
6. Pending Tasks: work explicitly requested that is not finished yet.
7. User Preferences: coding style, conventions and instructions the user has given.
8. Key Decisions: design choices made and the reasoning the user agreed with.

Be precise and complete. Quote file paths and identifiers exactly.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_request_has_all_sections() {
        for heading in [
            "Technical Context",
            "Project Overview",
            "Code Changes",
            "Debugging & Issues",
            "Current Status",
            "Pending Tasks",
            "User Preferences",
            "Key Decisions",
        ] {
            assert!(SUMMARY_REQUEST.contains(heading), "{heading}");
        }
    }
}
