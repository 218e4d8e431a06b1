use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    EventKind,
};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A move waiting for the debounce window to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub from: PathBuf,
    pub to: PathBuf,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created { path: PathBuf, is_dir: bool },
    Modified { path: PathBuf },
    Deleted { path: PathBuf, is_dir: bool },
    Moved(PendingMove),
}

impl FsEvent {
    /// Paths the event touches: the source and destination for moves.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            FsEvent::Created { path, .. } | FsEvent::Modified { path } | FsEvent::Deleted { path, .. } => {
                vec![path.as_path()]
            }
            FsEvent::Moved(mv) => vec![mv.from.as_path(), mv.to.as_path()],
        }
    }
}

/// Convert a notify::Event into zero or more FsEvent.
pub fn event_to_ops(event: notify::Event) -> Vec<FsEvent> {
    let mut ops = Vec::new();
    match event.kind {
        EventKind::Create(CreateKind::File) => {
            for path in event.paths {
                ops.push(FsEvent::Created { path, is_dir: false });
            }
        }
        EventKind::Create(CreateKind::Folder) => {
            for path in event.paths {
                ops.push(FsEvent::Created { path, is_dir: true });
            }
        }
        EventKind::Create(_) => {
            for path in event.paths {
                let is_dir = path.is_dir();
                ops.push(FsEvent::Created { path, is_dir });
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // rename move event contains two paths (from, to)
            if let [from, to] = event.paths.as_slice() {
                push_move(&mut ops, from.clone(), to.clone());
            }
        }
        // Half of a rename. A move across the watched root only ever shows up
        // like this; inside the root a paired `Both` follows and redoes the
        // work as no-ops. Judge by whether the path is still there.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::From | RenameMode::To)) => {
            for path in event.paths {
                push_presence(&mut ops, path);
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {}
        EventKind::Modify(_) => {
            for path in event.paths {
                if !path.is_dir() {
                    ops.push(FsEvent::Modified { path });
                }
            }
        }
        EventKind::Remove(RemoveKind::File) => {
            for path in event.paths {
                ops.push(FsEvent::Deleted { path, is_dir: false });
            }
        }
        EventKind::Remove(RemoveKind::Folder) => {
            for path in event.paths {
                ops.push(FsEvent::Deleted { path, is_dir: true });
            }
        }
        EventKind::Remove(_) => {
            // kind unknown: both removals are existence checked downstream
            for path in event.paths {
                ops.push(FsEvent::Deleted { path: path.clone(), is_dir: false });
                ops.push(FsEvent::Deleted { path, is_dir: true });
            }
        }
        _ => {}
    }
    ops
}

fn push_presence(ops: &mut Vec<FsEvent>, path: PathBuf) {
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => {
            // a directory moved in from outside arrives whole, with no
            // events for what it contains
            for entry in WalkDir::new(&path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                ops.push(FsEvent::Created {
                    is_dir: entry.file_type().is_dir(),
                    path: entry.into_path(),
                });
            }
        }
        Ok(_) => ops.push(FsEvent::Created { path, is_dir: false }),
        Err(_) => {
            ops.push(FsEvent::Deleted { path: path.clone(), is_dir: false });
            ops.push(FsEvent::Deleted { path, is_dir: true });
        }
    }
}

/// A renamed directory also moves everything inside it; one move is emitted
/// per descendant so its contents follow the directory.
fn push_move(ops: &mut Vec<FsEvent>, from: PathBuf, to: PathBuf) {
    let is_dir = to.is_dir();
    ops.push(FsEvent::Moved(PendingMove {
        from: from.clone(),
        to: to.clone(),
        is_dir,
    }));
    if !is_dir {
        return;
    }
    for entry in WalkDir::new(&to).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let Ok(rel) = entry.path().strip_prefix(&to) else {
            continue;
        };
        ops.push(FsEvent::Moved(PendingMove {
            from: from.join(rel),
            is_dir: entry.file_type().is_dir(),
            to: entry.into_path(),
        }));
    }
}
