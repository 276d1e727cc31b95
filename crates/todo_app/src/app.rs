use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use todo_core::{FileStorage, Task, TaskStore};
use todo_notify::worker::VIEW_ACTION;
use todo_notify::{
    parse_time_of_day, DeliveryWorker, NotificationError, NotificationGateway, Permission,
    Reminders, WorkerConfig, WorkerEvent, WorkerHandle,
};

use crate::config::AppConfig;
use crate::console::{ConsolePlatform, ConsoleWorkerHost, SharedInput};

const HELP: &str = "\
commands:
  add <text>            create a task
  list                  show active and completed tasks
  toggle <n>            mark task n done / not done
  edit <n> <text>       replace the text of task n
  rm <n>                delete task n
  remind <n> <HH:MM>    remind about task n at the next HH:MM
  cancel <n>            withdraw the reminder for task n
  permission            show or request notification permission
  click <tag|n> [action] interact with a shown notification (action `view` opens the app)
  help                  show this text
  quit                  exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    List,
    Toggle(usize),
    Edit(usize, String),
    Remove(usize),
    Remind(usize, String),
    Cancel(usize),
    Permission,
    Click { target: String, action: Option<String> },
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let command = match head.to_ascii_lowercase().as_str() {
        "add" | "a" => Command::Add(rest.to_string()),
        "list" | "ls" | "l" => Command::List,
        "toggle" | "t" | "done" => Command::Toggle(position(rest)?),
        "edit" | "e" => {
            let (n, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: edit <n> <text>"))?;
            Command::Edit(position(n)?, text.trim().to_string())
        }
        "rm" | "delete" | "del" => Command::Remove(position(rest)?),
        "remind" | "r" => {
            let (n, at) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: remind <n> <HH:MM>"))?;
            Command::Remind(position(n)?, at.trim().to_string())
        }
        "cancel" => Command::Cancel(position(rest)?),
        "permission" | "perm" => Command::Permission,
        "click" => {
            let mut parts = rest.split_whitespace();
            let target = parts
                .next()
                .ok_or_else(|| anyhow!("usage: click <tag|n> [action]"))?
                .to_string();
            Command::Click {
                target,
                action: parts.next().map(str::to_string),
            }
        }
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command `{other}`, try `help`"),
    };
    Ok(command)
}

fn position(raw: &str) -> Result<usize> {
    let n: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("`{}` is not a task number", raw.trim()))?;
    if n == 0 {
        bail!("task numbers start at 1");
    }
    Ok(n)
}

/// The terminal front end: reads the store, routes changes through it.
pub struct Shell {
    store: Arc<TaskStore>,
    reminders: Reminders,
    host: Arc<ConsoleWorkerHost>,
    worker: Option<Arc<WorkerHandle>>,
}

impl Shell {
    pub fn new(
        store: Arc<TaskStore>,
        reminders: Reminders,
        host: Arc<ConsoleWorkerHost>,
        worker: Option<Arc<WorkerHandle>>,
    ) -> Self {
        Self {
            store,
            reminders,
            host,
            worker,
        }
    }

    /// Tasks in display order: active first, then completed.
    pub fn ordered(&self) -> Vec<Task> {
        let mut tasks = self.store.active();
        tasks.extend(self.store.completed());
        tasks
    }

    fn nth(&self, n: usize) -> Result<Task> {
        self.ordered()
            .into_iter()
            .nth(n - 1)
            .ok_or_else(|| anyhow!("no task {n}"))
    }

    pub async fn execute(&self, command: Command) -> Result<String> {
        match command {
            Command::Add(text) => match self.store.add_task(&text) {
                Some(_) => Ok(format!("added \"{}\"", text.trim())),
                None => Ok("task description cannot be empty".to_string()),
            },
            Command::List => Ok(self.render()),
            Command::Toggle(n) => {
                let task = self.nth(n)?;
                match self.store.toggle_task(task.id) {
                    Some(true) => Ok(format!("done: {}", task.text)),
                    Some(false) => Ok(format!("reopened: {}", task.text)),
                    None => bail!("task {n} disappeared"),
                }
            }
            Command::Edit(n, text) => {
                let task = self.nth(n)?;
                if self.store.update_task(task.id, &text) {
                    Ok(format!("updated task {n}"))
                } else {
                    Ok("task description cannot be empty".to_string())
                }
            }
            Command::Remove(n) => {
                let task = self.nth(n)?;
                self.store.delete_task(task.id);
                Ok(format!("deleted \"{}\"", task.text))
            }
            Command::Remind(n, at) => self.remind(n, &at).await,
            Command::Cancel(n) => {
                let task = self.nth(n)?;
                if self.reminders.withdraw(task.id) {
                    Ok(format!("reminder for \"{}\" withdrawn", task.text))
                } else {
                    Ok(format!("no reminder pending for \"{}\"", task.text))
                }
            }
            Command::Permission => match self.reminders.gateway().request_permission().await {
                Ok(permission) => Ok(format!("notifications: {permission}")),
                Err(NotificationError::Unsupported) => {
                    Ok("this terminal does not support notifications".to_string())
                }
            },
            Command::Click { target, action } => self.click(&target, action),
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok(String::new()),
        }
    }

    async fn remind(&self, n: usize, at: &str) -> Result<String> {
        let task = self.nth(n)?;
        let time_of_day = parse_time_of_day(at)?;
        match self.reminders.gateway().request_permission().await {
            Ok(Permission::Granted) => {}
            Ok(_) => {
                return Ok(
                    "permission denied: enable notifications to use reminders".to_string(),
                )
            }
            Err(NotificationError::Unsupported) => {
                return Ok("this terminal does not support notifications".to_string())
            }
        }
        let request = self.reminders.schedule(&task, time_of_day);
        let local = request.fire_at.with_timezone(&Local);
        let day = if local.date_naive() == Local::now().date_naive() {
            "today"
        } else {
            "tomorrow"
        };
        Ok(format!(
            "reminder set for \"{}\" at {} {day}",
            task.text,
            time_of_day.format("%H:%M")
        ))
    }

    fn click(&self, target: &str, action: Option<String>) -> Result<String> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| anyhow!("notifications are shown directly; nothing to click"))?;
        let notification = self
            .host
            .find(target)
            .ok_or_else(|| anyhow!("no notification `{target}` on screen"))?;
        let opens = action.as_deref() == Some(VIEW_ACTION);
        worker.post(WorkerEvent::NotificationClick {
            notification,
            action,
        })?;
        Ok(if opens { "opening" } else { "dismissed" }.to_string())
    }

    pub fn render(&self) -> String {
        let active = self.store.active();
        let completed = self.store.completed();
        let mut out = format!("Active Tasks ({})\n", active.len());
        if active.is_empty() {
            out.push_str("  No active tasks. Time to relax!\n");
        }
        let mut index = 0;
        for task in &active {
            index += 1;
            let bell = if self.reminders.is_pending(task.id) {
                " [reminder]"
            } else {
                ""
            };
            out.push_str(&format!(
                "  {index:>2}. [ ] {}  ({}){bell}\n",
                task.text,
                created_on(task)
            ));
        }
        if !completed.is_empty() {
            out.push_str(&format!("Completed ({})\n", completed.len()));
            for task in &completed {
                index += 1;
                out.push_str(&format!(
                    "  {index:>2}. [x] {}  ({})\n",
                    task.text,
                    created_on(task)
                ));
            }
        }
        out.trim_end().to_string()
    }
}

fn created_on(task: &Task) -> String {
    task.created_at
        .with_timezone(&Local)
        .format("%Y-%m-%d")
        .to_string()
}

/// Read-eval loop over `input` until `quit` or end of input.
pub async fn repl<R>(shell: &Shell, input: SharedInput<R>) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
{
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let line = {
            let mut lines = input.lock().await;
            lines.next_line().await.context("failed to read input")?
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        match shell.execute(command).await {
            Ok(message) if !message.is_empty() => println!("{message}"),
            Ok(_) => {}
            Err(err) => println!("error: {err:#}"),
        }
    }
    Ok(())
}

pub async fn run(config: AppConfig) -> Result<()> {
    info!(data_dir = %config.data_dir.display(), "starting taskmaster");
    let storage = Arc::new(FileStorage::new(&config.data_dir));
    let store = Arc::new(
        TaskStore::builder()
            .with_storage(storage)
            .with_key(config.storage_key.clone())
            .build(),
    );
    if let Err(err) = store.watch() {
        warn!(%err, "not following external changes to the task record");
    }
    store.subscribe(|event| debug!(?event, "store changed"));

    let host = Arc::new(ConsoleWorkerHost::new(config.app_url.clone()));
    let worker = config.worker_enabled.then(|| {
        Arc::new(
            DeliveryWorker::new(
                host.clone(),
                WorkerConfig {
                    app_url: config.app_url.clone(),
                    icon: config.icon.clone(),
                    badge: config.icon.clone(),
                },
            )
            .spawn(),
        )
    });

    let input: SharedInput<BufReader<tokio::io::Stdin>> = Arc::new(tokio::sync::Mutex::new(
        BufReader::new(tokio::io::stdin()).lines(),
    ));
    let platform = Arc::new(ConsolePlatform::new(
        config.notifications,
        input.clone(),
        worker.clone(),
        config.app_url.clone(),
    ));
    let gateway = NotificationGateway::builder(platform)
        .worker_script(config.worker_script.clone())
        .build();
    let reminders = Reminders::new(gateway.clone());
    reminders.track(&store);

    let shell = Shell::new(store, reminders, host, worker);
    println!("Task Master. Type `help` for commands.");
    println!("{}", shell.render());
    repl(&shell, input).await?;

    let withdrawn = gateway.cancel_all();
    info!(withdrawn, "taskmaster stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationMode;
    use todo_core::MemoryStorage;

    fn shell(mode: NotificationMode) -> Shell {
        let store = Arc::new(
            TaskStore::builder()
                .with_storage(Arc::new(MemoryStorage::new()))
                .build(),
        );
        let input: SharedInput<BufReader<&'static [u8]>> =
            Arc::new(tokio::sync::Mutex::new(BufReader::new(&b""[..]).lines()));
        let host = Arc::new(ConsoleWorkerHost::new("/"));
        let platform = Arc::new(ConsolePlatform::new(mode, input, None, "/"));
        let reminders = Reminders::new(NotificationGateway::new(platform));
        reminders.track(&store);
        Shell::new(store, reminders, host, None)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_command("add Buy milk").unwrap(),
            Command::Add("Buy milk".into())
        );
        assert_eq!(parse_command("  ls ").unwrap(), Command::List);
        assert_eq!(parse_command("toggle 2").unwrap(), Command::Toggle(2));
        assert_eq!(
            parse_command("edit 1 Buy oat milk").unwrap(),
            Command::Edit(1, "Buy oat milk".into())
        );
        assert_eq!(
            parse_command("remind 3 07:30").unwrap(),
            Command::Remind(3, "07:30".into())
        );
        assert_eq!(
            parse_command("click abc view").unwrap(),
            Command::Click {
                target: "abc".into(),
                action: Some("view".into())
            }
        );
        assert!(parse_command("toggle 0").is_err());
        assert!(parse_command("toggle x").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[tokio::test]
    async fn add_toggle_delete_through_the_shell() {
        let shell = shell(NotificationMode::Granted);
        shell.execute(Command::Add("Buy milk".into())).await.unwrap();
        assert_eq!(
            shell.execute(Command::Add("   ".into())).await.unwrap(),
            "task description cannot be empty"
        );
        assert_eq!(shell.ordered().len(), 1);

        shell.execute(Command::Toggle(1)).await.unwrap();
        assert!(shell.ordered()[0].completed);
        assert!(shell.render().contains("Completed (1)"));

        shell.execute(Command::Remove(1)).await.unwrap();
        assert!(shell.ordered().is_empty());
        assert!(shell.execute(Command::Toggle(1)).await.is_err());
    }

    #[tokio::test]
    async fn remind_requires_permission() {
        let denied = shell(NotificationMode::Denied);
        denied.execute(Command::Add("Call Mom".into())).await.unwrap();
        let reply = denied
            .execute(Command::Remind(1, "09:00".into()))
            .await
            .unwrap();
        assert!(reply.starts_with("permission denied"));
        assert!(denied.reminders.pending().is_empty());

        let unsupported = shell(NotificationMode::Unsupported);
        unsupported
            .execute(Command::Add("Call Mom".into()))
            .await
            .unwrap();
        let reply = unsupported
            .execute(Command::Remind(1, "09:00".into()))
            .await
            .unwrap();
        assert!(reply.contains("does not support"));
    }

    #[tokio::test]
    async fn remind_then_delete_withdraws() {
        let shell = shell(NotificationMode::Granted);
        shell.execute(Command::Add("Pay rent".into())).await.unwrap();
        let reply = shell
            .execute(Command::Remind(1, "09:00".into()))
            .await
            .unwrap();
        assert!(reply.starts_with("reminder set for \"Pay rent\" at 09:00"));
        assert_eq!(shell.reminders.pending().len(), 1);
        assert!(shell.render().contains("[reminder]"));

        assert!(shell
            .execute(Command::Remind(1, "9 o'clock".into()))
            .await
            .is_err());

        shell.execute(Command::Remove(1)).await.unwrap();
        assert!(shell.reminders.pending().is_empty());
    }

    #[tokio::test]
    async fn click_without_worker_is_reported() {
        let shell = shell(NotificationMode::Granted);
        assert!(shell
            .execute(Command::Click {
                target: "1".into(),
                action: None
            })
            .await
            .is_err());
    }
}
