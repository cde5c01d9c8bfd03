use std::{
    io::Write,
    process::{Command, Stdio},
    time::Duration,
};

use anyhow::Result;
use linewise::{Alignment, AnnotateOptions, Engine, EvalOptions, Outcome, Program};

fn ruby_available() -> bool {
    Command::new("ruby")
        .args(["-e", "exit 0"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! require_ruby {
    () => {
        if !ruby_available() {
            println!("ruby not found on PATH, skipping");
            return Ok(());
        }
    };
}

fn line_aligned() -> AnnotateOptions {
    AnnotateOptions { alignment: Alignment::Line, ..Default::default() }
}

async fn annotate_with(program: Program, options: EvalOptions) -> Result<(Engine, String)> {
    let mut engine = Engine::new(program, options, line_aligned());
    engine.evaluate().await?;
    let body = engine.annotated_body()?;
    Ok((engine, body))
}

#[tokio::test]
async fn annotates_each_line() -> Result<()> {
    require_ruby!();
    let (_, body) = annotate_with(Program::new("a = 1\nb = a + 2\n[a, b]\n"), EvalOptions::new()).await?;
    assert_eq!(body, "a = 1  # => 1\nb = a + 2  # => 3\n[a, b]  # => [1, 3]\n");
    Ok(())
}

#[tokio::test]
async fn missing_newline_round_trips() -> Result<()> {
    require_ruby!();
    let (engine, body) = annotate_with(Program::new("1 + 1"), EvalOptions::new()).await?;
    assert!(engine.missing_newline());
    assert_eq!(body, "1 + 1  # => 2");
    Ok(())
}

#[tokio::test]
async fn loop_bodies_are_capped() -> Result<()> {
    require_ruby!();
    let options = EvalOptions { max_line_captures: Some(2), ..EvalOptions::new() };
    let (engine, body) = annotate_with(Program::new("5.times do |i|\n  i * 2\nend\n"), options).await?;
    let result = engine.results()?.expect("successful run");
    assert_eq!(result.values_at(2), vec!["0", "2"]);
    assert_eq!(result.values_at(3), vec!["5"]);
    assert_eq!(result.dropped_captures, 3);
    assert_eq!(body, "5.times do |i|\n  i * 2  # => 0, 2\nend  # => 5\n");
    Ok(())
}

#[tokio::test]
async fn timeout_kills_the_program() -> Result<()> {
    require_ruby!();
    let options = EvalOptions { timeout: Duration::from_millis(500), ..EvalOptions::new() };
    let (engine, body) = annotate_with(Program::new("1\nsleep 30\n"), options).await?;
    assert!(engine.timed_out()?);
    assert_eq!(engine.results()?, None);
    assert_eq!(body, "1\nsleep 30\n");
    Ok(())
}

#[tokio::test]
async fn stdout_is_collected_in_order() -> Result<()> {
    require_ruby!();
    let (engine, body) = annotate_with(Program::new("puts 'hi'\nprint 'a', 'b'\n"), EvalOptions::new()).await?;
    assert_eq!(engine.results()?.expect("successful run").stdout, "hi\nab");
    assert_eq!(body, "puts 'hi'  # => nil\nprint 'a', 'b'  # => nil\n\n# >> hi\n# >> ab\n");
    Ok(())
}

#[tokio::test]
async fn escaping_exception_is_reported_on_its_line() -> Result<()> {
    require_ruby!();
    let (engine, body) = annotate_with(Program::new("x = 1\nraise 'boom'\n"), EvalOptions::new()).await?;
    let result = engine.results()?.expect("program reported completion");
    let exception = result.exception().expect("exception recorded");
    assert_eq!(exception.line, 2);
    assert_eq!(exception.class_name, "RuntimeError");
    assert_eq!(result.exit_status, Some(1));
    assert!(body.starts_with("x = 1  # => 1\nraise 'boom'  # ~> RuntimeError: boom\n"));
    assert!(body.contains("\n# ~> RuntimeError\n# ~> boom\n"));
    Ok(())
}

#[tokio::test]
async fn program_stdin_is_fed() -> Result<()> {
    require_ruby!();
    let program = Program::new("line = gets\nline.upcase\n").with_stdin("hello\n");
    let (_, body) = annotate_with(program, EvalOptions::new()).await?;
    assert_eq!(body, "line = gets  # => \"hello\\n\"\nline.upcase  # => \"HELLO\\n\"\n");
    Ok(())
}

#[tokio::test]
async fn failing_inspect_does_not_crash() -> Result<()> {
    require_ruby!();
    let src = "class Bad\n  def inspect\n    raise 'no'\n  end\nend\nBad.new\n";
    let (engine, _) = annotate_with(Program::new(src), EvalOptions::new()).await?;
    let result = engine.results()?.expect("successful run");
    assert_eq!(result.values_at(6), vec!["#<Bad (inspect failed: RuntimeError)>"]);
    assert!(!result.has_exception());
    Ok(())
}

#[tokio::test]
async fn hard_exit_is_unexpected() -> Result<()> {
    require_ruby!();
    let (mut engine, body) = annotate_with(Program::new("1\nexit!(3)\n"), EvalOptions::new()).await?;
    let exit = engine.unexpected_exception()?.expect("unexpected exit");
    assert_eq!(exit.status, Some(3));
    assert_eq!(body, "1\nexit!(3)\n");
    assert!(matches!(engine.evaluate().await?, Outcome::UnexpectedException(_)));
    Ok(())
}

#[tokio::test]
async fn concurrent_evaluations_do_not_collide() -> Result<()> {
    require_ruby!();
    let (a, b) = tokio::join!(
        annotate_with(Program::new(":a\n"), EvalOptions::new()),
        annotate_with(Program::new(":b\n"), EvalOptions::new()),
    );
    assert_eq!(a?.1, ":a  # => :a\n");
    assert_eq!(b?.1, ":b  # => :b\n");
    Ok(())
}

#[test]
fn binary_annotates_stdin_and_reports_syntax_errors() -> Result<()> {
    require_ruby!();
    let run = |src: &str| -> Result<std::process::Output> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_linewise"))
            .args(["--alignment", "line"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child.stdin.take().expect("piped stdin").write_all(src.as_bytes())?;
        Ok(child.wait_with_output()?)
    };

    let ok = run("2 * 21\n")?;
    assert_eq!(ok.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&ok.stdout), "2 * 21  # => 42\n");

    let raised = run("raise 'x'\n")?;
    assert_eq!(raised.status.code(), Some(1));

    let broken = run("def f\n")?;
    assert_eq!(broken.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&broken.stderr).contains("missing 'end'"));
    Ok(())
}
