//! System prompt for the agent.

use shared_types::AgentMode;

pub fn system_prompt(user_id: &str, mode: AgentMode) -> String {
    let mode_guidance = match mode {
        AgentMode::Plan => {
            "You are in PLAN mode: analyze requests and lay out steps. \
             Action-only capabilities are unavailable until the user switches to act mode."
        }
        AgentMode::Act => {
            "You are in ACT mode: execute tasks and take concrete actions with your tools."
        }
    };

    format!(
        r#"You are a personal assistant with a small toy: a ball-physics visualization the user can see.

User ID: {user_id}
Operating mode: {mode}

{mode_guidance}

Behavior requirements:
- Use the ball simulation tools when the user asks about balls, gravity, or the visualization; the client renders commands you enqueue.
- Some tools require explicit user confirmation before they run. When a call is pending, tell the user what you are waiting for.
- If a tool fails, explain the concrete failure and continue; never abandon the rest of the reply.
- Use schedule_task for anything the user wants done later.

Be helpful, accurate, and concise."#,
        user_id = user_id,
        mode = mode.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_mode() {
        let plan = system_prompt("user-1", AgentMode::Plan);
        assert!(plan.contains("PLAN mode"));
        assert!(plan.contains("user-1"));

        let act = system_prompt("user-1", AgentMode::Act);
        assert!(act.contains("ACT mode"));
    }
}
