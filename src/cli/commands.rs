use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use crossbeam_channel::Receiver;
use time::{macros::format_description, OffsetDateTime};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::config::AppConfig;
use crate::content::{ContentFormat, DraftContent};
use crate::journaling::AutoSaveEvent;
use crate::listing::{load_listing, DraftSummary, Listing};
use crate::session::{DraftSession, SessionOptions};
use crate::storage::{Draft, DraftRepository};

const COMPOSE_HELP: &str = "\
Plain lines are appended to the draft. Commands:
  :undo            step back one edit
  :redo            step forward again
  :title TEXT      rename the draft
  :save            save now
  :export          write the content to the export file
  :show            print the current draft
  :delete          delete the draft and stop
  :quit            stop (pending autosave is dropped)
A line starting with '::' is appended with one colon removed.";

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Title for the draft ("Task" when omitted or blank)
    #[arg()]
    pub title: Option<String>,
    /// Provide the content inline. If omitted, reads from stdin.
    #[arg(long)]
    pub content: Option<String>,
    /// Content format (html, delta, plain); sniffed from the content when omitted
    #[arg(long)]
    pub format: Option<ContentFormat>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Print the summaries as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Draft identifier
    pub id: i64,
    /// New title
    #[arg(long)]
    pub title: Option<String>,
    /// Replacement content
    #[arg(long)]
    pub content: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Draft identifier
    pub id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Draft identifier
    pub id: i64,
    /// Directory to write into instead of the data directory
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ComposeArgs {
    /// Resume a stored draft instead of starting a new one
    pub id: Option<i64>,
}

pub async fn new_draft<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    args: NewArgs,
) -> Result<()> {
    let body = match args.content {
        Some(body) => body,
        None => read_stdin()?.unwrap_or_default(),
    };
    let id = create_draft(repo, config, args.title.as_deref(), args.format, body).await?;
    println!("Created draft #{id}");
    Ok(())
}

async fn create_draft<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    title: Option<&str>,
    format: Option<ContentFormat>,
    body: String,
) -> Result<i64> {
    let format = format.unwrap_or_else(|| ContentFormat::detect(&body));
    let options = SessionOptions::from_config(config);
    let mut session = DraftSession::new(repo, &options, DraftContent::new(format, body));
    if let Some(title) = title {
        session.set_title(title)?;
    }
    let id = session.save().await.context("saving new draft")?;
    session.close().await;
    Ok(id)
}

pub async fn list_drafts<R: DraftRepository>(
    repo: &R,
    config: &AppConfig,
    args: ListArgs,
) -> Result<()> {
    let listing = load_listing(repo, config.listing.preview_chars).await;
    if let Some(err) = &listing.error {
        eprintln!("Could not load drafts: {err}");
    }
    print!("{}", render_listing(&listing, args.json)?);
    Ok(())
}

fn render_listing(listing: &Listing, json: bool) -> Result<String> {
    if json {
        let mut out =
            serde_json::to_string_pretty(&listing.drafts).context("serializing draft list")?;
        out.push('\n');
        return Ok(out);
    }
    Ok(format_listing(&listing.drafts))
}

fn format_listing(drafts: &[DraftSummary]) -> String {
    if drafts.is_empty() {
        return "No drafts yet.\n".to_string();
    }
    let mut out = String::new();
    for draft in drafts {
        let _ = writeln!(&mut out, "#{}  {}  {}", draft.id, draft.date, draft.title);
        let preview = if draft.preview.is_empty() {
            "(empty)"
        } else {
            draft.preview.as_str()
        };
        let _ = writeln!(&mut out, "    {preview}");
    }
    out
}

pub async fn edit_draft<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    args: EditArgs,
) -> Result<()> {
    if args.title.is_none() && args.content.is_none() {
        bail!("nothing to change: pass --title and/or --content");
    }
    let id = apply_edit(repo, config, args.id, args.title, args.content).await?;
    println!("Updated draft #{id}");
    Ok(())
}

async fn apply_edit<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    id: i64,
    title: Option<String>,
    content: Option<String>,
) -> Result<i64> {
    let draft = find_draft(repo.as_ref(), id).await?;
    let options = SessionOptions::from_config(config);
    let mut session = DraftSession::open(repo, &options, draft);
    if let Some(title) = title {
        session.set_title(title)?;
    }
    if let Some(content) = content {
        session.edit(content)?;
    }
    let id = session
        .save()
        .await
        .with_context(|| format!("saving draft #{id}"))?;
    session.close().await;
    Ok(id)
}

pub async fn delete_draft<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    args: DeleteArgs,
) -> Result<()> {
    let Some(draft) = lookup_draft(repo.as_ref(), args.id).await? else {
        println!("Draft #{} does not exist, nothing to delete", args.id);
        return Ok(());
    };
    let options = SessionOptions::from_config(config);
    let mut session = DraftSession::open(repo, &options, draft);
    session
        .delete()
        .await
        .with_context(|| format!("deleting draft #{}", args.id))?;
    session.close().await;
    println!("Deleted draft #{}", args.id);
    Ok(())
}

pub async fn export_draft<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    args: ExportArgs,
) -> Result<()> {
    let draft = find_draft(repo.as_ref(), args.id).await?;
    let dir = export_dir(config, args.output.as_deref());
    let options = SessionOptions::from_config(config);
    let session = DraftSession::open(repo, &options, draft);
    let written = session.export(dir, &config.export.file_name).await?;
    session.close().await;
    println!("Exported draft #{} to {}", args.id, written.display());
    Ok(())
}

fn export_dir<'a>(config: &'a AppConfig, output: Option<&'a Path>) -> &'a Path {
    output.unwrap_or(config.export.directory.as_path())
}

pub async fn compose<R: DraftRepository>(
    repo: Arc<R>,
    config: &AppConfig,
    args: ComposeArgs,
) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let mut stdout = io::stdout();
    run_compose(repo, config, args.id, input, &mut stdout).await
}

async fn run_compose<R, I, W>(
    repo: Arc<R>,
    config: &AppConfig,
    id: Option<i64>,
    input: I,
    out: &mut W,
) -> Result<()>
where
    R: DraftRepository,
    I: AsyncBufRead + Unpin,
    W: Write,
{
    let options = SessionOptions::from_config(config);
    let session = match id {
        Some(id) => {
            let draft = find_draft(repo.as_ref(), id).await?;
            DraftSession::open(Arc::clone(&repo), &options, draft)
        }
        None => DraftSession::new(Arc::clone(&repo), &options, DraftContent::default()),
    };
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let mut session = session.with_events(events_tx);
    match session.id() {
        Some(id) => writeln!(out, "Editing draft #{id} ({})", session.display_title())?,
        None => writeln!(out, "Composing a new draft (:help for commands)")?,
    }

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("reading compose input")? {
        let flow = apply_compose_input(&mut session, config, parse_compose_input(&line), out).await?;
        drain_events(&events_rx, out)?;
        if flow == Flow::Stop {
            break;
        }
    }

    let unsaved = session.is_dirty();
    session.close().await;
    drain_events(&events_rx, out)?;
    if unsaved {
        writeln!(out, "Unsaved changes discarded")?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ComposeInput {
    Append(String),
    Undo,
    Redo,
    Title(String),
    Save,
    Delete,
    Export,
    Show,
    Help,
    Quit,
    Unknown(String),
}

fn parse_compose_input(line: &str) -> ComposeInput {
    let Some(command) = line.strip_prefix(':') else {
        return ComposeInput::Append(line.to_string());
    };
    if command.starts_with(':') {
        return ComposeInput::Append(command.to_string());
    }
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));
    match name {
        "undo" => ComposeInput::Undo,
        "redo" => ComposeInput::Redo,
        "title" => ComposeInput::Title(rest.trim().to_string()),
        "save" => ComposeInput::Save,
        "delete" => ComposeInput::Delete,
        "export" => ComposeInput::Export,
        "show" => ComposeInput::Show,
        "help" => ComposeInput::Help,
        "quit" | "q" => ComposeInput::Quit,
        other => ComposeInput::Unknown(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

async fn apply_compose_input<R, W>(
    session: &mut DraftSession<R>,
    config: &AppConfig,
    input: ComposeInput,
    out: &mut W,
) -> Result<Flow>
where
    R: DraftRepository,
    W: Write,
{
    match input {
        ComposeInput::Append(line) => {
            let body = &session.content().body;
            let next = if body.is_empty() {
                line
            } else {
                format!("{body}\n{line}")
            };
            session.edit(next)?;
        }
        ComposeInput::Undo => {
            if !session.undo()? {
                writeln!(out, "Nothing to undo")?;
            }
        }
        ComposeInput::Redo => {
            if !session.redo()? {
                writeln!(out, "Nothing to redo")?;
            }
        }
        ComposeInput::Title(title) => {
            session.set_title(title)?;
            writeln!(out, "Title: {}", session.display_title())?;
        }
        ComposeInput::Save => match session.save().await {
            Ok(id) => writeln!(out, "Saved draft #{id}")?,
            Err(err) => writeln!(out, "Save failed: {err}")?,
        },
        ComposeInput::Delete => match session.delete().await {
            Ok(()) => {
                writeln!(out, "Draft deleted")?;
                return Ok(Flow::Stop);
            }
            Err(err) => writeln!(out, "Delete failed: {err}")?,
        },
        ComposeInput::Export => match session
            .export(&config.export.directory, &config.export.file_name)
            .await
        {
            Ok(path) => writeln!(out, "Exported to {}", path.display())?,
            Err(err) => writeln!(out, "Export failed: {err}")?,
        },
        ComposeInput::Show => {
            writeln!(out, "[{}]", session.display_title())?;
            writeln!(out, "{}", session.content().body)?;
        }
        ComposeInput::Help => writeln!(out, "{COMPOSE_HELP}")?,
        ComposeInput::Quit => return Ok(Flow::Stop),
        ComposeInput::Unknown(name) => writeln!(out, "Unknown command :{name} (try :help)")?,
    }
    Ok(Flow::Continue)
}

fn drain_events<W: Write>(events: &Receiver<AutoSaveEvent>, out: &mut W) -> io::Result<()> {
    for event in events.try_iter() {
        writeln!(out, "{}", describe_event(&event))?;
    }
    Ok(())
}

fn describe_event(event: &AutoSaveEvent) -> String {
    match event {
        AutoSaveEvent::Saved {
            outcome, timestamp, ..
        } => format!(
            "[autosave {}] draft #{} saved",
            format_clock(*timestamp),
            outcome.id()
        ),
        AutoSaveEvent::Failed { message, .. } => format!("[autosave] failed: {message}"),
    }
}

fn format_clock(at: OffsetDateTime) -> String {
    at.format(&format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

async fn lookup_draft<R: DraftRepository>(repo: &R, id: i64) -> Result<Option<Draft>> {
    let drafts = repo.list().await.context("loading drafts")?;
    Ok(drafts.into_iter().find(|draft| draft.id == id))
}

async fn find_draft<R: DraftRepository>(repo: &R, id: i64) -> Result<Draft> {
    lookup_draft(repo, id)
        .await?
        .with_context(|| format!("draft #{id} not found"))
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, ConfigPaths};
    use crate::journaling::SaveOutcome;
    use crate::storage::{self, StorageHandle};
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    #[tokio::test]
    async fn create_then_edit_goes_through_storage() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;

        let id = create_draft(
            Arc::clone(&storage),
            &config,
            Some("Groceries"),
            None,
            "<p>milk</p>".to_string(),
        )
        .await?;
        let draft = find_draft(storage.as_ref(), id).await?;
        assert_eq!(draft.title, "Groceries");
        assert_eq!(draft.content.format, Some(ContentFormat::Html));

        apply_edit(
            Arc::clone(&storage),
            &config,
            id,
            None,
            Some("<p>milk, <i>eggs</i></p>".to_string()),
        )
        .await?;
        let listing = load_listing(storage.as_ref(), 0).await;
        assert_eq!(listing.drafts.len(), 1);
        assert_eq!(listing.drafts[0].title, "Groceries");
        assert_eq!(listing.drafts[0].preview, "milk, eggs");
        Ok(())
    }

    #[tokio::test]
    async fn blank_title_and_explicit_format_are_kept() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;
        let id = create_draft(
            Arc::clone(&storage),
            &config,
            Some("   "),
            Some(ContentFormat::DeltaEncoded),
            "insert=Hello insert= World".to_string(),
        )
        .await?;

        let draft = find_draft(storage.as_ref(), id).await?;
        assert_eq!(draft.title, "Task");
        assert_eq!(draft.content.format, Some(ContentFormat::DeltaEncoded));
        assert_eq!(draft.content.preview(), "Hello World");
        Ok(())
    }

    #[tokio::test]
    async fn editing_unknown_draft_fails() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;
        let err = apply_edit(storage, &config, 42, Some("x".into()), None)
            .await
            .expect_err("missing draft");
        assert_eq!(err.to_string(), "draft #42 not found");
        Ok(())
    }

    #[test]
    fn listing_renders_one_block_per_draft() {
        let drafts = vec![
            DraftSummary {
                id: 1,
                date: "05-Mar".into(),
                title: "Groceries".into(),
                preview: "milk, eggs".into(),
            },
            DraftSummary {
                id: 2,
                date: "06-Mar".into(),
                title: "Task".into(),
                preview: String::new(),
            },
        ];
        insta::assert_snapshot!(format_listing(&drafts).trim_end(), @r###"
        #1  05-Mar  Groceries
            milk, eggs
        #2  06-Mar  Task
            (empty)
        "###);
        assert_eq!(format_listing(&[]), "No drafts yet.\n");
    }

    #[test]
    fn json_listing_carries_every_field() -> TestResult {
        let listing = Listing {
            drafts: vec![DraftSummary {
                id: 7,
                date: "01-Jan".into(),
                title: "Task".into(),
                preview: "hello".into(),
            }],
            error: None,
        };
        let rendered = render_listing(&listing, true)?;
        let value: serde_json::Value = serde_json::from_str(&rendered)?;
        assert_eq!(value[0]["id"], 7);
        assert_eq!(value[0]["date"], "01-Jan");
        assert_eq!(value[0]["preview"], "hello");
        Ok(())
    }

    #[test]
    fn compose_lines_parse_into_commands() {
        assert_eq!(
            parse_compose_input("buy milk"),
            ComposeInput::Append("buy milk".into())
        );
        assert_eq!(parse_compose_input(":undo"), ComposeInput::Undo);
        assert_eq!(
            parse_compose_input(":title  Weekly plan "),
            ComposeInput::Title("Weekly plan".into())
        );
        assert_eq!(parse_compose_input(":title"), ComposeInput::Title(String::new()));
        assert_eq!(
            parse_compose_input("::smile"),
            ComposeInput::Append(":smile".into())
        );
        assert_eq!(parse_compose_input(":q"), ComposeInput::Quit);
        assert_eq!(
            parse_compose_input(":frobnicate"),
            ComposeInput::Unknown("frobnicate".into())
        );
    }

    #[tokio::test]
    async fn compose_appends_undoes_saves_and_exports() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;
        let script = b"first line\nsecond line\n:undo\n:title Shopping\n:save\n:export\n:quit\nignored\n";
        let mut out = Vec::new();

        run_compose(Arc::clone(&storage), &config, None, &script[..], &mut out).await?;

        let output = String::from_utf8(out)?;
        assert!(output.contains("Title: Shopping"));
        assert!(output.contains("Saved draft #1"));
        assert!(!output.contains("Unsaved changes discarded"));

        let drafts = storage.fetch_drafts()?;
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Shopping");
        assert_eq!(drafts[0].content.body, "first line");
        assert_eq!(
            std::fs::read_to_string(config.export.target_path())?,
            "first line"
        );
        Ok(())
    }

    #[tokio::test]
    async fn compose_delete_removes_stored_draft() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;
        let id = create_draft(
            Arc::clone(&storage),
            &config,
            Some("Old"),
            None,
            "stale".to_string(),
        )
        .await?;
        let mut out = Vec::new();

        run_compose(
            Arc::clone(&storage),
            &config,
            Some(id),
            &b"more\n:delete\nafter\n"[..],
            &mut out,
        )
        .await?;

        let output = String::from_utf8(out)?;
        assert!(output.starts_with(&format!("Editing draft #{id} (Old)")));
        assert!(output.contains("Draft deleted"));
        assert!(storage.fetch_drafts()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn compose_reports_discarded_edits_at_end_of_input() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;
        let mut out = Vec::new();

        run_compose(Arc::clone(&storage), &config, None, &b"draft only\n"[..], &mut out).await?;

        assert!(String::from_utf8(out)?.ends_with("Unsaved changes discarded\n"));
        assert!(storage.fetch_drafts()?.is_empty());
        Ok(())
    }

    #[test]
    fn autosave_events_render_for_the_terminal() {
        let saved = AutoSaveEvent::Saved {
            outcome: SaveOutcome::Updated { id: 3 },
            revision: 2,
            timestamp: time::macros::datetime!(2024-03-05 09:07:01 UTC),
        };
        assert_eq!(describe_event(&saved), "[autosave 09:07:01] draft #3 saved");

        let failed = AutoSaveEvent::Failed {
            draft_id: None,
            message: "disk full".into(),
        };
        assert_eq!(describe_event(&failed), "[autosave] failed: disk full");
    }

    #[test]
    fn export_dir_prefers_output_override() {
        let mut config = AppConfig::default();
        config.export.directory = PathBuf::from("/data");
        assert_eq!(export_dir(&config, None), Path::new("/data"));
        assert_eq!(
            export_dir(&config, Some(Path::new("/tmp/out"))),
            Path::new("/tmp/out")
        );
    }

    #[tokio::test]
    async fn deleting_twice_is_not_an_error() -> TestResult {
        let (_temp, storage, config) = setup_storage()?;
        let id = create_draft(Arc::clone(&storage), &config, None, None, "x".into()).await?;

        delete_draft(Arc::clone(&storage), &config, DeleteArgs { id }).await?;
        delete_draft(Arc::clone(&storage), &config, DeleteArgs { id }).await?;
        assert!(lookup_draft(storage.as_ref(), id).await?.is_none());
        Ok(())
    }

    fn setup_storage() -> TestResult<(TempDir, Arc<StorageHandle>, AppConfig)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let root = temp.path();
        let paths = ConfigPaths::rooted(
            root.join("config"),
            root.join("config/config.toml"),
            root.join("data"),
        );
        let config = ConfigLoader::from_paths(paths).load_or_init()?;
        let handle = storage::init(&config.storage)?;
        Ok((temp, Arc::new(handle), config))
    }
}
