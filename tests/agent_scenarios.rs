//! End-to-end runs of the executor with a scripted model and a real DuckDB.

use std::sync::Arc;

use qabot::{
    create_agent_executor_with_model, Database, ExecutorOptions, StubModel, TelemetryCollector,
};

fn titanic() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.query("CREATE TABLE titanic (name VARCHAR, survived BOOLEAN, fare DOUBLE)")
        .unwrap();
    db.query(
        "INSERT INTO titanic VALUES ('Allen', true, 211.3), ('Braund', false, 7.25), ('Cumings', true, 71.28)",
    )
    .unwrap();
    db
}

#[tokio::test]
async fn lists_tables_through_show_tables() {
    let model = StubModel::new([
        "Thought: Do I need to use a tool? Yes\nAction: Show Tables\nAction Input: ",
        "Thought: Do I need to use a tool? No\nAI: The database has one table: titanic.",
    ]);
    let mut exec = create_agent_executor_with_model(
        model.clone(),
        titanic(),
        ExecutorOptions::default().with_intermediate_steps(true),
    );

    let out = exec.run("What tables are available?").await.unwrap();

    assert!(out.output.contains("titanic"));
    let steps = out.intermediate_steps.unwrap();
    assert_eq!(steps.len(), 1);
    assert!(steps[0].observation.contains("titanic"));
    assert!(model.requests()[1][1].content.contains("titanic"));
}

#[tokio::test]
async fn answers_arithmetic_with_python() {
    let model = StubModel::new([
        "Thought: Do I need to use a tool? Yes\nAction: Python\nAction Input: 2+2",
        "```text\n2+2\n```",
        "Thought: Do I need to use a tool? No\nAI: 2 + 2 is 4.",
    ]);
    let mut exec = create_agent_executor_with_model(
        model,
        titanic(),
        ExecutorOptions::default().with_intermediate_steps(true),
    );

    let out = exec.run("what is 2+2?").await.unwrap();

    assert_eq!(out.intermediate_steps.unwrap()[0].observation, "Answer: 4");
    assert!(out.output.contains('4'));
}

#[tokio::test]
async fn unrelated_questions_get_i_dont_know() {
    let model = StubModel::new(["Thought: Do I need to use a tool? No\nAI: I don't know"]);
    let mut exec =
        create_agent_executor_with_model(model.clone(), titanic(), ExecutorOptions::default());

    let answer = exec.answer("Who won the 1998 world cup?").await.unwrap();

    assert_eq!(answer, "I don't know");
    assert_eq!(model.requests().len(), 1);
}

#[tokio::test]
async fn data_op_runs_sql_and_reports_it() {
    let collector = TelemetryCollector::default();
    let model = StubModel::new([
        "Thought: Do I need to use a tool? Yes\nAction: Data Op\nAction Input: How many passengers survived?",
        " SELECT count(*) AS survivors FROM titanic WHERE survived",
        "Answer: 2 passengers survived.",
        "Thought: Do I need to use a tool? No\nAI: 2 passengers survived.\nSQL: SELECT count(*) AS survivors FROM titanic WHERE survived",
    ]);
    let mut exec = create_agent_executor_with_model(
        model.clone(),
        titanic(),
        ExecutorOptions::default()
            .with_intermediate_steps(true)
            .with_tables(["titanic"])
            .with_callback(Arc::new(collector.clone())),
    );

    let out = exec.run("How many passengers survived?").await.unwrap();

    let observation = &out.intermediate_steps.unwrap()[0].observation;
    assert!(observation.starts_with("2 passengers survived."));
    assert!(observation.contains("SQL executed:\nSELECT count(*) AS survivors"));

    let sql_prompt = &model.requests()[1][0].content;
    assert!(sql_prompt.contains("titanic"));
    assert!(sql_prompt.contains("most interested in these tables: titanic"));

    assert_eq!(collector.tool_invocations(), vec!["Data Op".to_string()]);
}

#[tokio::test]
async fn memory_accumulates_across_turns() {
    let model = StubModel::new([
        "AI: Hello Ada.",
        "AI: Your name is Ada.",
    ]);
    let mut exec =
        create_agent_executor_with_model(model.clone(), titanic(), ExecutorOptions::default());

    exec.run("Hi, I'm Ada").await.unwrap();
    exec.run("What is my name?").await.unwrap();

    assert_eq!(exec.memory().len(), 2);
    assert_eq!(exec.memory().entries()[1].output, "Your name is Ada.");
    let second = &model.requests()[1][1].content;
    assert!(second.contains("Human: Hi, I'm Ada\nAI: Hello Ada."));
    assert!(second.contains("New input: What is my name?"));
}

#[tokio::test]
async fn read_only_database_refuses_writes_as_text() {
    let model = StubModel::new([
        "Action: Data Op\nAction Input: delete the poor passengers",
        "DELETE FROM titanic WHERE fare < 10",
        "I could not do that.",
        "AI: I refuse to delete data.",
    ]);
    let db = titanic().with_read_only();
    let mut exec = create_agent_executor_with_model(
        model,
        db.clone(),
        ExecutorOptions::default().with_intermediate_steps(true),
    );

    let out = exec.run("delete the poor passengers").await.unwrap();

    assert!(out.intermediate_steps.unwrap()[0]
        .observation
        .contains("SQL executed:\nDELETE FROM titanic"));
    assert_eq!(db.query("SELECT * FROM titanic").unwrap().rows.len(), 3);
}
