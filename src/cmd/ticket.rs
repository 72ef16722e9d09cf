use std::io::{self, Write};
use std::sync::Arc;

use clap::Args;

use crate::context::AppContext;
use crate::domain::ticket::{Ticket, TicketDraft, TicketEdits, TicketId};
use crate::error::{AppError, AppResult};
use crate::poller::{ChannelSink, FanoutSink, PollEvent, PollSink, StopReason, TracingSink};
use crate::services::{AutoConfirm, Confirm};
use crate::workflow::desk::{DeleteOutcome, TicketDesk};

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Ticket id to follow until it reaches a terminal status.
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only show tickets whose id, title or description contains this text.
    #[arg(short, long)]
    pub search: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[arg(short, long)]
    pub title: String,
    #[arg(short, long)]
    pub description: String,
    /// Keep polling the new ticket until it settles.
    #[arg(short, long)]
    pub watch: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub generated_code: Option<String>,
    #[arg(long)]
    pub test_cases: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    pub id: String,
    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ApproveArgs {
    pub id: String,
}

fn open_desk(ctx: &AppContext, sink: Arc<dyn PollSink>) -> TicketDesk {
    TicketDesk::new(Arc::clone(&ctx.backend), sink, ctx.config.poll_interval)
}

async fn open_selected(ctx: &AppContext, id: String) -> AppResult<TicketDesk> {
    let mut desk = open_desk(ctx, Arc::new(TracingSink));
    desk.open(&TicketId::new(id)).await?;
    Ok(desk)
}

pub async fn run_watch(ctx: &AppContext, args: WatchArgs) -> AppResult<()> {
    let ticket = ctx.backend.get_ticket(&TicketId::new(args.id)).await?;
    println!("{}", summary_line(&ticket));
    follow(ctx, ticket).await
}

async fn follow(ctx: &AppContext, ticket: Ticket) -> AppResult<()> {
    if !ticket.status.is_pending() {
        println!("Ticket {} is {}; nothing to watch.", ticket.id, ticket.status);
        return Ok(());
    }

    let (channel, mut events) = ChannelSink::new();
    let sink = FanoutSink::new(vec![
        Arc::new(TracingSink) as Arc<dyn PollSink>,
        Arc::new(channel),
    ]);
    let mut desk = open_desk(ctx, Arc::new(sink));
    // The ticket was just read or created; the first poll is one interval out.
    desk.select_fresh(ticket);

    while let Some(event) = events.recv().await {
        match event {
            PollEvent::StatusChanged {
                id,
                previous,
                ticket,
            } => println!("{id}: {previous} -> {}", ticket.status),
            PollEvent::FetchFailed { id, error } => {
                eprintln!("Warning: could not refresh {id}: {error}");
            }
            PollEvent::Stopped {
                id,
                status,
                reason: StopReason::Settled,
            } => {
                println!("Ticket {id} settled as {status}.");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

pub async fn run_list(ctx: &AppContext, args: ListArgs) -> AppResult<()> {
    let mut desk = open_desk(ctx, Arc::new(TracingSink));
    if let Some(search) = args.search {
        desk.set_search(search);
    }
    let tickets = desk.list().await?;
    if tickets.is_empty() {
        println!("No tickets found.");
    }
    for ticket in &tickets {
        println!("{}", summary_line(ticket));
    }
    Ok(())
}

pub async fn run_show(ctx: &AppContext, args: ShowArgs) -> AppResult<()> {
    let ticket = ctx.backend.get_ticket(&TicketId::new(args.id)).await?;
    print!("{}", detail_view(&ticket));
    Ok(())
}

pub async fn run_create(ctx: &AppContext, args: CreateArgs) -> AppResult<()> {
    let mut desk = open_desk(ctx, Arc::new(TracingSink));
    desk.start_create();
    let ticket = desk
        .create(TicketDraft {
            title: args.title.trim().to_string(),
            description: args.description.trim().to_string(),
        })
        .await?;
    println!("Ticket {} created ({}).", ticket.id, ticket.status);
    drop(desk);

    if args.watch {
        follow(ctx, ticket).await?;
    }
    Ok(())
}

pub async fn run_edit(ctx: &AppContext, args: EditArgs) -> AppResult<()> {
    if args.description.is_none() && args.generated_code.is_none() && args.test_cases.is_none() {
        return Err(AppError::InvalidState(
            "nothing to update; pass --description, --generated-code or --test-cases".to_string(),
        ));
    }

    let mut desk = open_selected(ctx, args.id).await?;
    desk.start_edit()?;
    let current = desk
        .selected()
        .ok_or_else(|| AppError::InvalidState("no ticket selected".to_string()))?;

    let mut edits = TicketEdits::from_ticket(&current);
    if let Some(description) = args.description {
        edits.description = description;
    }
    if args.generated_code.is_some() {
        edits.generated_code = args.generated_code;
    }
    if args.test_cases.is_some() {
        edits.test_cases = args.test_cases;
    }

    desk.save_edits(edits).await?;
    println!("Ticket {} updated.", current.id);
    Ok(())
}

pub async fn run_delete(ctx: &AppContext, args: DeleteArgs) -> AppResult<()> {
    let mut desk = open_selected(ctx, args.id).await?;
    let outcome = if args.yes {
        desk.delete(&AutoConfirm(true)).await?
    } else {
        desk.delete(&PromptConfirm).await?
    };

    match outcome {
        DeleteOutcome::Deleted(id) => println!("Ticket {id} deleted."),
        DeleteOutcome::Declined => println!("Delete cancelled."),
    }
    Ok(())
}

pub async fn run_approve(ctx: &AppContext, args: ApproveArgs) -> AppResult<()> {
    let mut desk = open_selected(ctx, args.id).await?;
    let ticket = desk.approve().await?;
    println!("Ticket {} approved ({}).", ticket.id, ticket.status);
    Ok(())
}

/// Asks on stdin; anything but "y"/"yes" declines.
struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, question: &str) -> bool {
        let mut stdout = io::stdout();
        if write!(stdout, "{question} [y/N]: ")
            .and_then(|_| stdout.flush())
            .is_err()
        {
            return false;
        }

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        is_affirmative(&input)
    }
}

fn is_affirmative(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

fn summary_line(ticket: &Ticket) -> String {
    format!(
        "{:<26} {:<12} {}",
        ticket.id.as_str(),
        ticket.status.as_str(),
        ticket.display_title()
    )
}

fn detail_view(ticket: &Ticket) -> String {
    let mut out = format!(
        "Ticket: {}\nStatus: {}\nTitle: {}\n",
        ticket.id,
        ticket.status,
        ticket.display_title()
    );
    if !ticket.description.trim().is_empty() {
        out.push_str(&format!("\nDescription:\n{}\n", ticket.description.trim_end()));
    }
    if let Some(code) = ticket.generated_code.as_deref() {
        out.push_str(&format!("\nGenerated code:\n{}\n", code.trim_end()));
    }
    if let Some(tests) = ticket.test_cases.as_deref() {
        out.push_str(&format!("\nTest cases:\n{}\n", tests.trim_end()));
    }
    out
}
