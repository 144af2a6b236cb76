use crate::config::Config;
use crate::contacts::{ContactRecord, ContactSyncEngine, HttpTransport, Transport};
use crate::error::ErrorKind;
use crate::event::{Event, Notifier};
use crate::store::SqliteStore;
use crate::thumbnails::{resolve, ImageResult, ThumbnailCache};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
  /// Replace local contacts from the server, then fetch thumbnails
  #[default]
  Sync,
  /// Print stored contacts
  List,
  /// Fetch thumbnails for stored contacts
  Thumbnails,
  /// Show one stored contact, matched by name (case-insensitive substring)
  Show { name: String },
}

/// Main application state
pub struct App<T: Transport = HttpTransport> {
  config: Config,

  engine: ContactSyncEngine<T, SqliteStore>,

  thumbnails: ThumbnailCache<T>,

  /// Handed to background tasks so they can report back
  notifier: Notifier,

  events: mpsc::UnboundedReceiver<Event>,

  /// Display names by record key, for thumbnail reports
  names: HashMap<String, String>,

  /// Thumbnail requests not yet answered
  pending_images: usize,
  images_ready: usize,
  image_failures: usize,

  /// Error events printed so far
  errors_reported: usize,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let transport = Arc::new(
      HttpTransport::new(config.request_timeout()).map_err(|e| eyre!("{}", e))?,
    );
    Self::with_transport(config, transport)
  }
}

impl<T: Transport> App<T> {
  fn with_transport(config: Config, transport: Arc<T>) -> Result<Self> {
    let store = SqliteStore::open(&config.database_path()?)
      .map_err(|e| eyre!("Failed to open contact store: {}", e))?;
    let (notifier, events) = Notifier::channel();

    let engine = ContactSyncEngine::new(transport.clone(), store, notifier.clone());
    let thumbnails = ThumbnailCache::new(config.thumbnail_dir()?, transport);

    Ok(Self {
      config,
      engine,
      thumbnails,
      notifier,
      events,
      names: HashMap::new(),
      pending_images: 0,
      images_ready: 0,
      image_failures: 0,
      errors_reported: 0,
    })
  }

  /// Run one command. A failed sync has already been printed when this
  /// returns `ExitCode::FAILURE`.
  pub async fn run(&mut self, command: Command) -> Result<ExitCode> {
    match command {
      Command::Sync => {
        if !self.sync().await? {
          debug!(reported = self.errors_reported, "Sync failed, skipping thumbnails");
          return Ok(ExitCode::FAILURE);
        }
        self.load_thumbnails().await?;
      }
      Command::List => {
        self.print_contacts()?;
        self.print_last_sync()?;
      }
      Command::Thumbnails => self.load_thumbnails().await?,
      Command::Show { name } => self.show(&name).await?,
    }
    Ok(ExitCode::SUCCESS)
  }

  /// Returns whether the sync succeeded. Failures are reported through the
  /// engine's `Error` event only.
  async fn sync(&mut self) -> Result<bool> {
    let endpoint = self.config.endpoint_url()?;
    info!(%endpoint, results = self.config.results, "Starting sync");

    let outcome = self.engine.sync(&endpoint, self.config.results).await;

    // The engine has already reported the outcome as an event
    while let Ok(event) = self.events.try_recv() {
      self.handle_event(event)?;
    }

    Ok(outcome.is_ok())
  }

  async fn load_thumbnails(&mut self) -> Result<()> {
    let contacts = self
      .engine
      .contacts()
      .map_err(|e| eyre!("Failed to read contacts: {}", e))?;

    for record in &contacts {
      self.request_thumbnail(record);
    }

    while self.pending_images > 0 {
      match self.events.recv().await {
        Some(event) => self.handle_event(event)?,
        None => break,
      }
    }

    if self.images_ready + self.image_failures > 0 {
      println!(
        "{} thumbnails in {} ({} failed)",
        self.images_ready,
        self.thumbnails.dir().display(),
        self.image_failures
      );
    }
    Ok(())
  }

  fn request_thumbnail(&mut self, record: &ContactRecord) {
    let Some(url) = record.thumbnail_url.as_deref() else {
      return;
    };
    let Some(key) = resolve(url) else {
      debug!(url, "Thumbnail URL is not cacheable");
      return;
    };

    self
      .names
      .insert(record.key.clone(), record.display_name());
    self.pending_images += 1;

    match self.thumbnails.request(&key) {
      ImageResult::Ready(path) => self.notifier.image_ready(record.key.clone(), path),
      ImageResult::Pending(waiter) => {
        let notifier = self.notifier.clone();
        let record_key = record.key.clone();
        tokio::spawn(async move {
          match waiter.wait().await {
            Ok(path) => notifier.image_ready(record_key, path),
            Err(e) => notifier.error(
              ErrorKind::Download,
              format!("Thumbnail {} for {}: {}", key.name(), record_key, e),
            ),
          }
        });
      }
    }
  }

  fn handle_event(&mut self, event: Event) -> Result<()> {
    match event {
      Event::DataChanged => self.print_contacts()?,
      Event::ImageReady { record_key, path } => {
        self.pending_images = self.pending_images.saturating_sub(1);
        self.images_ready += 1;
        let name = self.names.get(&record_key).map(String::as_str).unwrap_or("");
        debug!(record_key, path = %path.display(), "Thumbnail ready");
        println!("  [img] {:<30} {}", name, path.display());
      }
      Event::Error { kind, message } => {
        if kind == ErrorKind::Download {
          self.pending_images = self.pending_images.saturating_sub(1);
          self.image_failures += 1;
        }
        self.errors_reported += 1;
        eprintln!("Error: {}", message);
      }
    }
    Ok(())
  }

  fn print_contacts(&self) -> Result<()> {
    let contacts = self
      .engine
      .contacts()
      .map_err(|e| eyre!("Failed to read contacts: {}", e))?;

    if contacts.is_empty() {
      println!("No contacts. Run `abook sync` first.");
      return Ok(());
    }

    for record in &contacts {
      println!("{:<30} {}", record.display_name(), record.detail_line());
    }
    println!("{} contacts", contacts.len());
    Ok(())
  }

  async fn show(&self, query: &str) -> Result<()> {
    let query = query.to_lowercase();
    let contacts = self
      .engine
      .contacts()
      .map_err(|e| eyre!("Failed to read contacts: {}", e))?;
    let record = contacts
      .iter()
      .find(|r| r.display_name().to_lowercase().contains(&query))
      .ok_or_else(|| eyre!("No contact matches {:?}", query))?;

    println!("{}", record.formal_name());
    for (label, value) in [
      ("gender", &record.gender),
      ("phone", &record.phone),
      ("cell", &record.cell),
      ("email", &record.email),
    ] {
      if let Some(value) = value {
        println!("  {:<8} {}", label, value);
      }
    }

    if let Some(key) = record.thumbnail_url.as_deref().and_then(resolve) {
      match self.thumbnails.fetch(&key).await {
        Ok(path) => println!("  {:<8} {}", "image", path.display()),
        Err(e) => eprintln!("Error: thumbnail unavailable: {}", e),
      }
    }
    Ok(())
  }

  fn print_last_sync(&self) -> Result<()> {
    let synced_at = self
      .engine
      .with_store(|store| store.last_synced_at())
      .map_err(|e| eyre!("Failed to read sync state: {}", e))?;

    match synced_at {
      Some(at) => println!("Last synced {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
      None => println!("Never synced"),
    }
    Ok(())
  }
}
