//! The two PR crews. Agents with tools get every tool the host lists; what
//! they may actually do is decided per call by the tool host.

use super::agent::{Agent, Crew, CrewError, Task};
use handoff_core::jsonrpc::ToolDescriptor;

const FAST_MODEL: &str = "gpt-4o-mini";
const REVIEW_MODEL: &str = "gpt-4o";

fn agent(
    role: &str,
    goal: &str,
    backstory: &str,
    model: &str,
    tools: Vec<ToolDescriptor>,
) -> Agent {
    Agent {
        role: role.into(),
        goal: goal.into(),
        backstory: backstory.into(),
        model: model.into(),
        tools,
    }
}

/// One researcher that fetches and summarizes the PR.
pub fn pr_summary(repo: &str, pr: u64, tools: Vec<ToolDescriptor>) -> Result<Crew, CrewError> {
    let researcher = agent(
        "PR Researcher",
        "Fetch and summarize PR information",
        "You are an expert at analyzing pull requests",
        FAST_MODEL,
        tools,
    );
    let task = Task {
        description: format!("Fetch PR #{pr} from {repo} and summarize it"),
        expected_output: "A brief summary of the PR".into(),
        agent: 0,
        context: vec![],
    };
    Crew::new(vec![researcher], vec![task])
}

/// Overview, code review and community analysis run independently against
/// the tool host; a writer without tools synthesizes their outputs.
pub fn pr_analysis(repo: &str, pr: u64, tools: Vec<ToolDescriptor>) -> Result<Crew, CrewError> {
    let agents = vec![
        agent(
            "PR Overview Specialist",
            "Fetch and summarize high-level PR information",
            "Expert at quickly understanding PR scope, purpose, and overall structure",
            FAST_MODEL,
            tools.clone(),
        ),
        agent(
            "Senior Code Reviewer",
            "Analyze code changes in detail, focusing on quality, security, and best practices",
            "Senior engineer with 10+ years experience in code review. Knows common pitfalls and anti-patterns.",
            REVIEW_MODEL,
            tools.clone(),
        ),
        agent(
            "Community Engagement Analyst",
            "Analyze PR comments, review feedback, and community discussion",
            "Expert at understanding team dynamics, identifying consensus, and surfacing concerns from code reviews",
            FAST_MODEL,
            tools,
        ),
        agent(
            "Technical Writer",
            "Create clear executive summary from all analyses",
            "Skilled technical writer who distills complex technical information into actionable insights for stakeholders",
            FAST_MODEL,
            Vec::new(),
        ),
    ];

    let tasks = vec![
        Task {
            description: format!(
                "Fetch PR #{pr} from repository {repo} and provide a comprehensive overview.\n\n\
                 Use the fetch_pr tool to get:\n\
                 - Title and description\n\
                 - Author and state\n\
                 - Statistics (files, additions, deletions, commits)\n\
                 - Overall purpose and scope"
            ),
            expected_output:
                "Complete PR overview with title, description, author, state, and statistics".into(),
            agent: 0,
            context: vec![],
        },
        Task {
            description: format!(
                "Perform a detailed code review of PR #{pr} from repository {repo}.\n\n\
                 Use fetch_pr_files to examine what files changed and the diffs.\n\n\
                 Identify:\n\
                 1. Key technical changes and their purpose\n\
                 2. Code quality observations\n\
                 3. Potential bugs or issues\n\
                 4. Security considerations\n\
                 5. Best practice violations\n\n\
                 Provide specific, actionable feedback."
            ),
            expected_output:
                "Technical code review with specific concerns, observations, and recommendations"
                    .into(),
            agent: 1,
            context: vec![],
        },
        Task {
            description: format!(
                "Analyze the discussion and feedback on PR #{pr} from repository {repo}.\n\n\
                 Use fetch_pr_comments to examine review comments and discussion threads.\n\n\
                 Identify:\n\
                 1. Main concerns raised by reviewers\n\
                 2. Points of consensus\n\
                 3. Unresolved questions or debates\n\
                 4. Overall community sentiment"
            ),
            expected_output:
                "Summary of community feedback, concerns raised, and discussion sentiment".into(),
            agent: 2,
            context: vec![],
        },
        Task {
            description: "Synthesize all analyses into a comprehensive executive summary.\n\n\
                 Include:\n\
                 1. What changed and why (2-3 sentences)\n\
                 2. Code quality assessment\n\
                 3. Key concerns or risks identified\n\
                 4. Community sentiment\n\
                 5. Clear recommendation: Approve / Request Changes / Needs Discussion\n\
                 6. Reasoning for recommendation\n\n\
                 Make it suitable for non-technical stakeholders."
                .into(),
            expected_output:
                "Executive summary (3-5 paragraphs) with clear recommendation and reasoning".into(),
            agent: 3,
            context: vec![0, 1, 2],
        },
    ];

    Crew::new(agents, tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        ["fetch_pr", "fetch_pr_files", "fetch_pr_comments"]
            .into_iter()
            .map(|n| ToolDescriptor {
                name: n.into(),
                description: String::new(),
                input_schema: json!({}),
                meta: None,
            })
            .collect()
    }

    #[test]
    fn analysis_crew_shape() {
        let crew = pr_analysis("acme/widgets", 42, tools()).unwrap();
        assert_eq!(crew.agents().len(), 4);
        assert_eq!(crew.tasks().len(), 4);

        let writer = &crew.agents()[3];
        assert!(writer.tools.is_empty());
        assert_eq!(crew.tasks()[3].context, vec![0, 1, 2]);
        assert!(crew.agents()[..3].iter().all(|a| a.tools.len() == 3));
        assert!(crew.tasks()[1].description.contains("PR #42"));
    }

    #[test]
    fn summary_crew_is_single_agent() {
        let crew = pr_summary("acme/widgets", 7, tools()).unwrap();
        assert_eq!(crew.agents().len(), 1);
        assert_eq!(crew.tasks()[0].description, "Fetch PR #7 from acme/widgets and summarize it");
    }
}
