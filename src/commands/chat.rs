use crate::citation::Citation;
use crate::client::Progress;
use crate::controller::{ChatController, ChatView};
use crate::db::models::{Conversation, Message, Sender};
use crate::error::ChatError;
use crate::metrics::Metrics;
use crate::preview::PreviewPanel;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const HELP: &str = "Commands:
  /new                   start a new chat
  /list                  list chats
  /switch <n|id>         switch to a chat
  /delete <n|id>         delete a chat
  /upload <file>...      upload PDF files (quote paths with spaces)
  /remove <filename>     remove an uploaded PDF
  /docs                  list uploaded PDFs
  /cite <n>              open citation n of the last reply
  /open <filename> <p>   open page p of a PDF
  /zoom in|out|fit       zoom the page preview
  /metrics               show token and latency estimates
  /help                  show this help
  /quit                  exit
Anything else is sent as a question.";

/// Plain terminal rendering. Replies are printed as they stream in.
#[derive(Debug, Default)]
pub struct TerminalView {
    printed: usize,
    conversation_ids: Vec<String>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a `/switch` or `/delete` argument: a number from the last
    /// listing, otherwise an id.
    fn conversation_ref(&self, arg: &str) -> String {
        arg.parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.conversation_ids.get(i).cloned())
            .unwrap_or_else(|| arg.to_string())
    }
}

fn read_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    let read = tokio::task::block_in_place(|| io::stdin().lock().read_line(&mut line))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

impl ChatView for TerminalView {
    fn clear(&mut self) {
        println!("\n────────────────────────────────────────");
    }

    fn show_message(&mut self, message: &Message) {
        match message.sender {
            Sender::User => println!("you> {}", message.text),
            Sender::Model => println!("pdf-chat> {}\n", message.text),
        }
    }

    fn show_notice(&mut self, text: &str) {
        println!("* {}", text);
    }

    fn set_sending(&mut self, _sending: bool) {}

    fn begin_reply(&mut self) {
        self.printed = 0;
        print!("pdf-chat> ");
        let _ = io::stdout().flush();
    }

    fn update_reply(&mut self, accumulated: &str, _progress: &Progress) {
        let fresh = accumulated.get(self.printed..).unwrap_or(accumulated);
        print!("{}", fresh);
        let _ = io::stdout().flush();
        self.printed = accumulated.len();
    }

    fn end_reply(&mut self, _message: &Message, citations: &[Citation]) {
        println!("\n");
        for (i, citation) in citations.iter().enumerate() {
            println!("  [{}] {}, page {}", i + 1, citation.filename, citation.page);
        }
        if !citations.is_empty() {
            println!("  (open with /cite <n>)");
        }
    }

    fn abort_reply(&mut self) {
        if self.printed > 0 {
            println!();
        }
        self.printed = 0;
    }

    fn show_metrics(&mut self, metrics: &Metrics) {
        let latency = metrics
            .last_turn()
            .map(|t| format!("{} ms", t.latency_ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  latency {} | ~{} input, ~{} output, ~{} total tokens (estimated)",
            latency,
            metrics.total_input_tokens,
            metrics.total_output_tokens,
            metrics.total_tokens()
        );
    }

    fn show_conversations(&mut self, conversations: &[Conversation], current: &str) {
        self.conversation_ids = conversations.iter().map(|c| c.id.clone()).collect();
        for (i, conversation) in conversations.iter().enumerate() {
            let marker = if conversation.id == current { "*" } else { " " };
            println!(
                "{} {:>2}. {}  ({})",
                marker,
                i + 1,
                conversation.title,
                conversation.updated_at
            );
        }
    }

    fn show_preview(&mut self, preview: &PreviewPanel) {
        let Some(page) = preview.page() else {
            println!("* No page open.");
            return;
        };
        let (width, height) = preview.display_size().unwrap_or_default();
        println!(
            "── {} · page {}/{} · {:.0}% ({:.0}x{:.0}) ──",
            page.filename,
            page.page,
            page.page_count,
            preview.scale() * 100.0,
            width,
            height
        );
        let highlighted = preview.highlighted_index();
        for (i, fragment) in page.text_layer.iter().enumerate() {
            let marker = if Some(i) == highlighted { ">>" } else { "  " };
            println!("{} {}", marker, fragment.text);
        }
        if highlighted.is_none() {
            println!("* Cited passage not found on this page.");
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        matches!(
            read_line(&format!("{} [y/N] ", question)),
            Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("y")
        )
    }
}

/// Interactive loop until `/quit` or end of input.
pub async fn run_repl(controller: &mut ChatController<TerminalView>) -> Result<(), ChatError> {
    println!("Type a question, or /help for commands.");
    loop {
        let Some(line) = read_line("> ").map_err(|e| ChatError::Config(e.to_string()))? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        let result = match command {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{}", HELP);
                Ok(())
            }
            "/new" => controller.create_conversation().map(|_| ()),
            "/list" => controller.list_conversations(),
            "/switch" => {
                let id = controller.view().conversation_ref(rest);
                controller.switch_conversation(&id)
            }
            "/delete" => {
                let id = controller.view().conversation_ref(rest);
                controller.delete_conversation(&id).map(|deleted| {
                    if !deleted {
                        println!("* Nothing deleted.");
                    }
                })
            }
            "/upload" => {
                let paths: Vec<PathBuf> = split_args(rest).into_iter().map(PathBuf::from).collect();
                for (_, result) in controller.upload(paths).await {
                    if let Ok(filename) = result {
                        println!("* Uploaded {}", filename);
                    }
                }
                Ok(())
            }
            "/remove" => {
                if !controller.remove_document(rest) {
                    println!("* No document named {}", rest);
                }
                Ok(())
            }
            "/docs" => {
                let names = controller.documents().filenames();
                if names.is_empty() {
                    println!("* No PDFs uploaded.");
                }
                for name in names {
                    println!("  {}", name);
                }
                Ok(())
            }
            "/cite" => {
                let citations = controller.last_reply_citations();
                match rest
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| citations.get(i))
                {
                    Some(citation) => controller.open_citation(citation).map(|_| ()),
                    None => {
                        println!("* No such citation.");
                        Ok(())
                    }
                }
            }
            "/open" => match rest.rsplit_once(char::is_whitespace) {
                Some((filename, page)) => match page.parse::<usize>() {
                    Ok(page) => controller.open_page(filename.trim(), page, None).map(|_| ()),
                    Err(_) => {
                        println!("* Usage: /open <filename> <page>");
                        Ok(())
                    }
                },
                None => {
                    println!("* Usage: /open <filename> <page>");
                    Ok(())
                }
            },
            "/zoom" => {
                match rest {
                    "in" => controller.zoom_in(),
                    "out" => controller.zoom_out(),
                    _ => controller.fit_to_width(),
                }
                Ok(())
            }
            "/metrics" => {
                let metrics = controller.metrics().clone();
                controller.view_mut().show_metrics(&metrics);
                Ok(())
            }
            _ if command.starts_with('/') => {
                println!("* Unknown command {}. Try /help.", command);
                Ok(())
            }
            _ => controller.submit(line).await.map(|_| ()),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Command failed");
            println!("* {}", e);
        }
    }
    Ok(())
}

/// Whitespace-separated arguments. Single or double quotes group words; outside
/// quotes a backslash escapes the next character.
fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => {
                quote = Some(c);
                in_arg = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_arg = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (_, c) => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}
