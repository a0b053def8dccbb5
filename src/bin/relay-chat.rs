//! Terminal chat client for the relay.
//!
//! Commands: `/image <path> [prompt]`, `/stream on|off`, `/clear`, `/quit`.

use std::env;
use std::io::Write;

use anyhow::{Context, Result};
use dotenv::dotenv;
use futures::StreamExt;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};

use gemini_relay::client::{
    Conversation, ForwardedIdentity, ImageUpload, RelayClient, SendOptions, DEFAULT_BACKEND_URL,
};
use gemini_relay::model::translate::IMAGE_FALLBACK_PROMPT;
use gemini_relay::web::payload::resolve_media_type;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));

    let backend_url = env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
    let identity = ForwardedIdentity::from_cookie(env::var("RELAY_COOKIE").ok());
    let client = RelayClient::new(&backend_url, identity);

    let mut conversation = match env::var("SYSTEM_PROMPT") {
        Ok(prompt) if !prompt.trim().is_empty() => Conversation::with_system(prompt),
        _ => Conversation::new(),
    };
    let options = SendOptions::default();
    let mut streaming = false;

    println!("Chatting with {backend_url}. Type /quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit", _) => break,
            ("/clear", _) => {
                conversation.clear();
                println!("(history cleared)");
            }
            ("/stream", mode) => {
                streaming = mode == "on";
                println!("(streaming {})", if streaming { "on" } else { "off" });
            }
            ("/image", args) => {
                let (path, prompt) = args.split_once(' ').unwrap_or((args, ""));
                match load_image(path).await {
                    Ok(image) => {
                        conversation.push_user(if prompt.is_empty() {
                            IMAGE_FALLBACK_PROMPT
                        } else {
                            prompt
                        });
                        let reply = client.send_with_image(&conversation, image, &options).await;
                        finish_turn(&mut conversation, reply.map(print_reply));
                    }
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
            _ if streaming => {
                conversation.push_user(line);
                let reply = stream_reply(&client, &conversation, &options).await;
                finish_turn(&mut conversation, reply);
            }
            _ => {
                conversation.push_user(line);
                let reply = client.send(&conversation, &options).await;
                finish_turn(&mut conversation, reply.map(print_reply));
            }
        }
    }

    Ok(())
}

async fn load_image(path: &str) -> Result<ImageUpload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let media_type = resolve_media_type(None, Some(&file_name))
        .map_err(|e| anyhow::anyhow!("{}", e.public_message()))?;

    debug!("Loaded {} ({} bytes, {})", file_name, data.len(), media_type);
    Ok(ImageUpload {
        file_name,
        media_type,
        data,
    })
}

async fn stream_reply(
    client: &RelayClient,
    conversation: &Conversation,
    options: &SendOptions,
) -> Result<String, gemini_relay::client::ClientError> {
    let mut stream = client.stream(conversation, options).await?;
    let mut reply = String::new();

    print!("ai> ");
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        print!("{chunk}");
        let _ = std::io::stdout().flush();
        reply.push_str(&chunk);
    }
    println!();
    Ok(reply)
}

fn print_reply(text: String) -> String {
    println!("ai> {text}");
    text
}

// Records the reply, or drops the unanswered user turn so it is not resent.
fn finish_turn(
    conversation: &mut Conversation,
    reply: Result<String, gemini_relay::client::ClientError>,
) {
    match reply {
        Ok(text) => conversation.push_assistant(text),
        Err(e) => {
            eprintln!("error: {e}");
            conversation.pop_last_user();
        }
    }
}
