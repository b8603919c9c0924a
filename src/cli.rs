use std::{
    env,
    io::{self, Write},
    process::{Command, Stdio},
};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, TimeZone};

use duo_planner::{
    calendar::{range::parse_wall_clock, Event, EventMapper, EventRange},
    storage::config::Config,
    sync::{
        remote::RemoteStore,
        sync_engine::{SelectionOptions, SyncEngine},
        todo_sync::TodoSync,
    },
    todo::{Category, Todo},
};

pub const USAGE: &str = "Usage: duo-planner [agenda [YYYY/MM/DD]]
       duo-planner add <title> <YYYY-MM-DD> [<YYYY-MM-DD>] [--from HH:MM] [--to HH:MM] [--together]
       duo-planner move <id> <start> [<end>]
       duo-planner delete <id>
       duo-planner todo [list [category] | add <category> <title> | done <id> | delete <id> | move <id> <index>]";

#[derive(Debug, Clone, PartialEq)]
pub enum CliMode {
    Agenda(NaiveDate),
    Add {
        title: String,
        first_day: NaiveDate,
        last_day: Option<NaiveDate>,
        from: Option<String>,
        to: Option<String>,
        together: bool,
    },
    Move {
        id: String,
        start: String,
        end: Option<String>,
    },
    Delete(String),
    Todo(TodoCommand),
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TodoCommand {
    List(Option<Category>),
    Add(Category, String),
    Done(String),
    Delete(String),
    Move(String, usize),
}

fn parse_day(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD.", value))
}

fn required(value: Option<String>, what: &str) -> Result<String, String> {
    value.ok_or_else(|| format!("Missing {}", what))
}

pub fn parse_cli_mode(
    args: impl IntoIterator<Item = String>,
    today: NaiveDate,
) -> Result<CliMode, String> {
    let mut args = args.into_iter().peekable();

    let Some(command) = args.next() else {
        return Ok(CliMode::Agenda(today));
    };

    match command.as_str() {
        "agenda" => {
            let date = match args.next() {
                Some(date_str) => NaiveDate::parse_from_str(&date_str, "%Y/%m/%d")
                    .map_err(|_| format!("Invalid date '{}'. Use YYYY/MM/DD.", date_str))?,
                None => today,
            };
            Ok(CliMode::Agenda(date))
        }
        "add" => {
            let mut positional = Vec::new();
            let mut from = None;
            let mut to = None;
            let mut together = false;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--from" => from = Some(required(args.next(), "time after --from")?),
                    "--to" => to = Some(required(args.next(), "time after --to")?),
                    "--together" => together = true,
                    _ if arg.starts_with("--") => return Err(format!("Unknown argument: {}", arg)),
                    _ => positional.push(arg),
                }
            }
            let mut positional = positional.into_iter();
            let title = required(positional.next(), "event title")?;
            let first_day = parse_day(&required(positional.next(), "event date")?)?;
            let last_day = positional.next().map(|day| parse_day(&day)).transpose()?;
            if let Some(extra) = positional.next() {
                return Err(format!("Unexpected argument: {}", extra));
            }
            Ok(CliMode::Add {
                title,
                first_day,
                last_day,
                from,
                to,
                together,
            })
        }
        "move" => Ok(CliMode::Move {
            id: required(args.next(), "event id")?,
            start: required(args.next(), "new start")?,
            end: args.next(),
        }),
        "delete" => Ok(CliMode::Delete(required(args.next(), "event id")?)),
        "todo" => parse_todo_command(args).map(CliMode::Todo),
        "help" | "--help" | "-h" => Ok(CliMode::Help),
        _ => Err(format!("Unknown command: {}", command)),
    }
}

fn parse_todo_command(mut args: impl Iterator<Item = String>) -> Result<TodoCommand, String> {
    let Some(action) = args.next() else {
        return Ok(TodoCommand::List(None));
    };

    match action.as_str() {
        "list" => Ok(TodoCommand::List(args.next().map(|c| c.parse()).transpose()?)),
        "add" => {
            let category: Category = required(args.next(), "category")?.parse()?;
            let title = args.collect::<Vec<_>>().join(" ");
            Ok(TodoCommand::Add(category, title))
        }
        "done" => Ok(TodoCommand::Done(required(args.next(), "todo id")?)),
        "delete" => Ok(TodoCommand::Delete(required(args.next(), "todo id")?)),
        "move" => {
            let id = required(args.next(), "todo id")?;
            let index = required(args.next(), "position")?;
            let index = index
                .parse::<usize>()
                .map_err(|_| format!("Invalid position '{}'", index))?;
            Ok(TodoCommand::Move(id, index))
        }
        _ => Err(format!("Unknown todo command: {}", action)),
    }
}

pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Reads `2024-06-01` as an all-day start, or `2024-06-01T19:00` / `2024-06-01 19:00` as a
/// timed one.
fn parse_moment(value: &str, offset: FixedOffset) -> Result<(DateTime<FixedOffset>, bool), String> {
    let invalid = || format!("Invalid time '{}'. Use YYYY-MM-DD or YYYY-MM-DDTHH:MM.", value);
    if let Ok(day) = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        let start = offset
            .from_local_datetime(&day.and_time(chrono::NaiveTime::MIN))
            .single()
            .ok_or_else(invalid)?;
        return Ok((start, true));
    }
    let naive = parse_wall_clock(value).ok_or_else(invalid)?;
    let start = offset.from_local_datetime(&naive).single().ok_or_else(invalid)?;
    Ok((start, false))
}

pub fn move_range(
    start: &str,
    end: Option<&str>,
    offset: FixedOffset,
) -> Result<EventRange, String> {
    let (start, all_day) = parse_moment(start, offset)?;
    let end = match end {
        Some(end) => {
            let (end, _) = parse_moment(end, offset)?;
            if end <= start {
                return Err("The end must come after the start".to_string());
            }
            Some(end)
        }
        None => None,
    };
    Ok(match end {
        Some(end) => EventRange::inferred(start, end),
        None => EventRange::new(start, None, all_day),
    })
}

pub async fn run_agenda_mode<S: RemoteStore>(
    engine: &SyncEngine<S>,
    date: NaiveDate,
) -> anyhow::Result<()> {
    engine.load(date, date).await?;

    let offset = local_offset();
    let day_start = offset
        .from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .single()
        .context("invalid local day start")?;
    let day_end = day_start + chrono::Duration::days(1);
    let events: Vec<Event> = engine
        .events()
        .into_iter()
        .filter(|event| event.starts_at < day_end && event.ends_at > day_start)
        .collect();

    let agenda = format_agenda_text(date, &events, engine.mapper());
    display_with_pager(&agenda)?;
    Ok(())
}

pub async fn run_add<S: RemoteStore>(
    engine: &SyncEngine<S>,
    title: String,
    first_day: NaiveDate,
    last_day: Option<NaiveDate>,
    options: SelectionOptions,
) -> anyhow::Result<()> {
    let range = EventRange::whole_days(first_day, last_day.unwrap_or(first_day), local_offset())
        .context("selected days cannot be represented in the local time zone")?;

    match engine.on_range_selected(range, Some(title), options).await? {
        Some(event) => {
            println!("Created {}", build_agenda_line(&event, engine.mapper(), usize::MAX))
        }
        None => println!("Nothing created."),
    }
    Ok(())
}

pub async fn run_move<S: RemoteStore>(
    engine: &SyncEngine<S>,
    id: &str,
    start: &str,
    end: Option<&str>,
) -> anyhow::Result<()> {
    let range = move_range(start, end, local_offset()).map_err(anyhow::Error::msg)?;
    engine.load_around(range.start.date_naive()).await?;
    engine.on_drag_or_resize(id, range).await?;
    if let Some(event) = engine.event(id) {
        println!("Moved {}", build_agenda_line(&event, engine.mapper(), usize::MAX));
    }
    Ok(())
}

pub async fn run_delete<S: RemoteStore>(engine: &SyncEngine<S>, id: &str) -> anyhow::Result<()> {
    engine.load_around(Local::now().date_naive()).await?;
    if engine.on_event_clicked(id).await? {
        println!("Deleted.");
    }
    Ok(())
}

pub async fn run_todo_command<S: RemoteStore>(
    todos: &TodoSync<S>,
    command: TodoCommand,
) -> anyhow::Result<()> {
    todos.load().await?;

    match command {
        TodoCommand::List(category) => {
            let categories = match category {
                Some(category) => vec![category],
                None => Category::ALL.to_vec(),
            };
            let listing = categories
                .into_iter()
                .map(|category| format_todo_list(category, &todos.in_category(category)))
                .collect::<Vec<_>>()
                .join("\n\n");
            println!("{}", listing);
        }
        TodoCommand::Add(category, title) => {
            let todo = todos.add(category, &title).await?;
            println!("Added [{}] {}", todo.id, todo.title);
        }
        TodoCommand::Done(id) => {
            let completed = todos.toggle(&id).await?;
            println!("{}", if completed { "Marked done." } else { "Marked open." });
        }
        TodoCommand::Delete(id) => {
            if todos.delete(&id).await? {
                println!("Deleted.");
            }
        }
        TodoCommand::Move(id, index) => {
            todos.reorder(&id, index).await?;
            println!("Moved.");
        }
    }
    Ok(())
}

fn format_todo_list(category: Category, todos: &[Todo]) -> String {
    let done = todos.iter().filter(|todo| todo.completed).count();
    let mut lines = vec![format!("{} ({}/{})", category.label(), done, todos.len())];
    if todos.is_empty() {
        lines.push("  Nothing here yet.".to_string());
    }
    for todo in todos {
        let mark = if todo.completed { "x" } else { " " };
        lines.push(format!("  [{}] {:>4}  {}", mark, todo.id, todo.title));
    }
    lines.join("\n")
}

fn format_agenda_text(date: NaiveDate, events: &[Event], mapper: &EventMapper) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Agenda for {}", date.format("%A, %B %d, %Y")));
    lines.push(String::new());

    if events.is_empty() {
        lines.push("No events scheduled.".to_string());
    } else {
        for event in events {
            lines.push(format!("- {}", build_agenda_line(event, mapper, usize::MAX)));
        }
    }

    lines.join("\n")
}

fn build_agenda_line(event: &Event, mapper: &EventMapper, width: usize) -> String {
    let time_label = if event.all_day {
        "All Day".to_string()
    } else {
        format!(
            "{}-{}",
            event.starts_at.format("%H:%M"),
            event.ends_at.format("%H:%M")
        )
    };

    let who = if event.is_together {
        "together".to_string()
    } else {
        mapper.owner_name(event)
    };
    let mut line = format!("{:<13} {} ({}) [{}]", time_label, event.title, who, event.id);
    if let Some(location) = &event.location
        && !location.is_empty()
    {
        line.push_str(&format!(" @ {}", location));
    }
    truncate_to_width(&line, width)
}

fn truncate_to_width(line: &str, width: usize) -> String {
    if width > 0 && line.chars().count() > width {
        let mut truncated = line.chars().take(width.saturating_sub(1)).collect::<String>();
        truncated.push('…');
        truncated
    } else {
        line.to_string()
    }
}

fn display_with_pager(text: &str) -> Result<(), io::Error> {
    let pager_value = env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let mut parts = pager_value.split_whitespace();
    let cmd = match parts.next() {
        Some(c) => c,
        None => {
            println!("{text}");
            return Ok(());
        }
    };
    let args: Vec<&str> = parts.collect();

    match Command::new(cmd)
        .args(&args)
        .stdin(Stdio::piped())
        .spawn()
    {
        Ok(mut child) => {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(text.as_bytes())?;
            }
            let _ = child.wait();
        }
        Err(_) => {
            println!("{text}");
        }
    }

    Ok(())
}

pub fn config_for_cli() -> anyhow::Result<Config> {
    Config::load_or_create().context("could not load configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use duo_planner::calendar::ColorPalette;
    use pretty_assertions::assert_eq;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn no_arguments_shows_todays_agenda() {
        assert_eq!(parse_cli_mode(Vec::<String>::new(), today()), Ok(CliMode::Agenda(today())));
    }

    #[test]
    fn agenda_accepts_slash_dates() {
        let mode = parse_cli_mode(args("agenda 2024/12/24"), today()).unwrap();

        assert_eq!(mode, CliMode::Agenda(NaiveDate::from_ymd_opt(2024, 12, 24).unwrap()));
    }

    #[test]
    fn add_collects_flags_in_any_position() {
        let line = args("add --together Dinner 2024-06-01 --from 19 --to 21:30");
        let mode = parse_cli_mode(line, today()).unwrap();

        assert_eq!(
            mode,
            CliMode::Add {
                title: "Dinner".to_string(),
                first_day: today(),
                last_day: None,
                from: Some("19".to_string()),
                to: Some("21:30".to_string()),
                together: true,
            }
        );
    }

    #[test]
    fn add_without_date_is_rejected() {
        assert!(parse_cli_mode(args("add Dinner"), today()).is_err());
    }

    #[test]
    fn todo_add_joins_title_words() {
        let mode = parse_cli_mode(args("todo add shopping oat milk"), today()).unwrap();

        assert_eq!(
            mode,
            CliMode::Todo(TodoCommand::Add(Category::Shopping, "oat milk".to_string()))
        );
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!(parse_cli_mode(args("todo list chores"), today()).is_err());
    }

    #[test]
    fn date_only_move_is_all_day() {
        let range = move_range("2024-06-03", None, utc()).unwrap();

        assert!(range.all_day);
        assert_eq!(range.duration(), chrono::Duration::days(1));
    }

    #[test]
    fn timed_move_defaults_to_one_hour() {
        let range = move_range("2024-06-03T19:00", None, utc()).unwrap();

        assert!(!range.all_day);
        assert_eq!(range.duration(), chrono::Duration::hours(1));
    }

    #[test]
    fn move_end_before_start_is_rejected() {
        assert!(move_range("2024-06-03T19:00", Some("2024-06-03T18:00"), utc()).is_err());
    }

    #[test]
    fn agenda_line_names_owner_and_location() {
        let mapper = EventMapper::new(
            ColorPalette {
                together: "#8b5cf6".to_string(),
                fallback: "#9e9e9e".to_string(),
                owners: HashMap::new(),
            },
            Box::new(HashMap::from([("user-a".to_string(), "Alex".to_string())])),
        );
        let range = move_range("2024-06-03T19:00", Some("2024-06-03T21:00"), utc()).unwrap();
        let mut event = Event::draft("Dinner", range, "user-a");
        event.id = "12".to_string();
        event.location = Some("Luigi's".to_string());

        let line = build_agenda_line(&event, &mapper, usize::MAX);

        assert_eq!(line, "19:00-21:00   Dinner (Alex) [12] @ Luigi's");
    }

    #[test]
    fn todo_list_shows_progress() {
        let mut milk = Todo::draft("Milk", Category::Shopping, "user-a", 0);
        milk.id = "1".to_string();
        milk.completed = true;
        let mut eggs = Todo::draft("Eggs", Category::Shopping, "user-a", 1);
        eggs.id = "2".to_string();

        let text = format_todo_list(Category::Shopping, &[milk, eggs]);

        assert_eq!(text, "Shopping (1/2)\n  [x]    1  Milk\n  [ ]    2  Eggs");
    }

    #[test]
    fn long_lines_are_truncated() {
        assert_eq!(truncate_to_width("abcdefgh", 5), "abcd…");
    }
}
