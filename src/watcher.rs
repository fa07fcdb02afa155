use std::path::PathBuf;

use crossbeam_channel::{Receiver, unbounded};

/// Signals once per filesystem event touching `path`. The watcher thread lives for the
/// rest of the process.
pub fn spawn_config_watcher(path: PathBuf) -> Receiver<()> {
    let (tx, rx) = unbounded::<()>();
    let spawned = std::thread::Builder::new()
        .name("strata-config-watch".into())
        .spawn(move || {
            use notify::{EventKind, RecursiveMode, Watcher};
            let mut watcher =
                match notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        match event.kind {
                            EventKind::Modify(_)
                            | EventKind::Create(_)
                            | EventKind::Remove(_)
                            | EventKind::Any => {
                                let _ = tx.send(());
                            }
                            _ => {}
                        }
                    }
                }) {
                    Ok(w) => w,
                    Err(e) => {
                        log::warn!("config watcher unavailable: {}", e);
                        return;
                    }
                };
            if let Err(e) = watcher.watch(path.as_path(), RecursiveMode::NonRecursive) {
                log::warn!("cannot watch {}: {}", path.display(), e);
                return;
            }
            loop {
                std::thread::sleep(std::time::Duration::from_secs(3600));
            }
        });
    if let Err(e) = spawned {
        log::warn!("config watcher thread: {}", e);
    }
    rx
}
