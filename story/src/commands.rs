//! Command handlers.

use crate::args::{GenerateArgs, ListArgs};
use story_core::{AppState, SortOrder, Story, StoryClient, StoryInput};
use tracing::info;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub async fn list(client: &StoryClient, args: ListArgs) -> CommandResult {
    let order = if args.oldest {
        SortOrder::Oldest
    } else {
        SortOrder::Newest
    };
    let mut stories = client.list_stories(order).await?;
    if let Some(limit) = args.limit {
        stories.truncate(limit);
    }

    if stories.is_empty() {
        println!("No stories yet.");
        return Ok(());
    }
    for story in &stories {
        print_summary(story);
    }
    Ok(())
}

pub async fn show(client: &StoryClient, id: &str) -> CommandResult {
    let story = client.get_story(id).await?;

    println!("=== {} ===", story.title);
    print_summary(&story);
    println!("Characters: {}", story.characters.join(", "));
    println!("Setting: {}", story.setting);
    if let Some(author) = &story.author {
        println!("Author: {author}");
    }
    if let Some(cover) = story.cover_url() {
        println!("Cover: {cover}");
    }
    match story.audio_url() {
        Some(audio) => println!("Audio: {audio}"),
        None => println!("Audio: none"),
    }
    println!();
    println!("{}", story.content);
    Ok(())
}

pub async fn generate(client: &StoryClient, args: GenerateArgs) -> CommandResult {
    let mut input = StoryInput::new(args.title)
        .with_age_range(args.age_range)
        .with_setting(args.setting);
    for name in &args.characters {
        if !input.add_character(name) {
            eprintln!("Skipping empty character name");
        }
    }

    println!("Generating \"{}\"...", input.title);
    let story = client.generate_story(input).await?;
    println!("Created story {}", story.id);
    print_summary(&story);
    Ok(())
}

pub async fn delete(client: &StoryClient, id: &str) -> CommandResult {
    client.delete_story(id).await?;
    println!("Deleted story {id}");
    Ok(())
}

pub async fn play(client: &StoryClient, id: &str) -> CommandResult {
    let story = client.get_story(id).await?;
    let screen = client.screen_playback(story);
    let mut status = client.playback_status();

    screen.toggle().await?;
    println!("Playing \"{}\" (Ctrl-C to stop)", screen.story().title);

    tokio::select! {
        _ = status.wait_for(|state| state.is_idle()) => {
            println!("Finished.");
        }
        _ = tokio::signal::ctrl_c() => {
            screen.on_app_state(AppState::Background).await;
            info!("interrupted");
            println!("Stopped.");
        }
    }
    Ok(())
}

fn print_summary(story: &Story) {
    println!(
        "{}  {}  {} ({})",
        story.id,
        story.created_at.format("%Y-%m-%d %H:%M"),
        story.title,
        story.age_range
    );
}
