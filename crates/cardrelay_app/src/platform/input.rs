//! Line commands typed on stdin, standing in for the browser's tab events
//! and the popup button.

use std::path::PathBuf;

use cardrelay_core::ReceiverId;

use super::save::DEFAULT_FILENAME;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Open { tab: ReceiverId, url: String },
    Visibility { tab: ReceiverId, visible: bool },
    Close { tab: ReceiverId },
    /// `text` may be empty; the panel reports that itself.
    Card { tab: ReceiverId, text: String },
    Last,
    /// Save the previewed card.
    Save { path: PathBuf },
    Help,
    Quit,
}

pub(crate) const HELP: &str = "\
commands:
  open <tab> <url>    load a page in a tab and inject the agent
  hide <tab>          background the tab
  show <tab>          bring the tab to the foreground
  close <tab>         close the tab
  card <tab> <text>   generate a card for the selected text
  last                pick up the last generated card
  save [path]         save the previewed card (default share-card.png)
  help
  quit";

pub(crate) fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();

    match word {
        "open" => {
            let (tab, url) = split_tab(rest)?;
            if url.is_empty() {
                return Err("usage: open <tab> <url>".to_string());
            }
            Ok(Input::Open { tab, url })
        }
        "hide" | "show" => Ok(Input::Visibility {
            tab: parse_tab(rest)?,
            visible: word == "show",
        }),
        "close" => Ok(Input::Close {
            tab: parse_tab(rest)?,
        }),
        "card" => {
            let (tab, text) = split_tab(rest)?;
            Ok(Input::Card { tab, text })
        }
        "last" => Ok(Input::Last),
        "save" => {
            let path = if rest.is_empty() { DEFAULT_FILENAME } else { rest.trim_end() };
            Ok(Input::Save {
                path: PathBuf::from(path),
            })
        }
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        "" => Err(String::new()),
        other => Err(format!("unknown command `{other}`, try `help`")),
    }
}

fn split_tab(rest: &str) -> Result<(ReceiverId, String), String> {
    let (tab, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    Ok((parse_tab(tab)?, tail.trim().to_string()))
}

fn parse_tab(raw: &str) -> Result<ReceiverId, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("`{}` is not a tab number", raw.trim()))
}
