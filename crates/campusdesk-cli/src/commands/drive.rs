//! Google Drive commands.

use std::path::Path;

use campusdesk_google::{DriveFile, FilePage, UploadFile};
use tracing::debug;

use crate::cli::DriveAction;
use crate::commands::App;
use crate::error::{ClientError, ClientResult};
use crate::output::{format_datetime, format_size, or_dash, truncate};

pub async fn run(app: &App, action: DriveAction) -> ClientResult<()> {
    let drive = app.drive();
    match action {
        DriveAction::Ls {
            folder,
            query,
            page_size,
            page_token,
        } => {
            let result = match query {
                Some(query) => {
                    drive
                        .list_files(Some(&query), page_size, page_token.as_deref())
                        .await
                }
                None => {
                    let folder = folder.as_deref().unwrap_or("root");
                    drive
                        .list_folder(folder, page_size, page_token.as_deref())
                        .await
                }
            };
            app.printer.emit(result, print_page)
        }
        DriveAction::Info { id } => {
            let result = drive.get_file(&id).await;
            app.printer.emit(result, print_file)
        }
        DriveAction::Mkdir { name, parent } => {
            let result = drive.create_folder(&name, parent.as_deref()).await;
            app.printer
                .emit(result, |f| println!("Created folder {} ({})", f.name, f.id))
        }
        DriveAction::Upload {
            path,
            parent,
            name,
            mime_type,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&path)?,
            };
            let data = tokio::fs::read(&path).await?;
            debug!(path = %path.display(), bytes = data.len(), "uploading");
            let upload = UploadFile::new(name, mime_type, data);
            let result = drive.upload(&upload, parent.as_deref()).await;
            app.printer
                .emit(result, |f| println!("Uploaded {} ({})", f.name, f.id))
        }
        DriveAction::Rename { id, name } => {
            let result = drive.rename(&id, &name).await;
            app.printer
                .emit(result, |f| println!("Renamed {} to {}", f.id, f.name))
        }
        DriveAction::Rm { id } => {
            let result = drive.delete(&id).await;
            app.printer.emit(result, |_| println!("Deleted {id}"))
        }
        DriveAction::Get {
            id,
            output,
            export_as,
        } => {
            let file = drive.get_file(&id).await?;
            if file.is_folder() {
                return Err(ClientError::Input(format!("{} is a folder", file.name)));
            }
            let data = if file.is_google_native() {
                drive.export(&id, &export_as).await?
            } else {
                drive.download(&id).await?
            };
            tokio::fs::write(&output, &data).await?;
            app.printer.emit(Ok(file), |f| {
                println!(
                    "Saved {} to {} ({})",
                    f.name,
                    output.display(),
                    format_size(data.len() as u64)
                );
            })
        }
    }
}

fn file_name(path: &Path) -> ClientResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ClientError::Input(format!("{} has no file name", path.display())))
}

fn print_page(page: &FilePage) {
    if page.files.is_empty() {
        println!("No files.");
    }
    for file in &page.files {
        let size = match (file.is_folder(), file.size) {
            (true, _) => "<dir>".to_string(),
            (false, Some(size)) => format_size(size),
            (false, None) => "-".to_string(),
        };
        let modified = file
            .modified_time
            .as_ref()
            .map(format_datetime)
            .unwrap_or_default();
        println!(
            "{:<40} {:>10} {:<16} {}",
            truncate(&file.name, 40),
            size,
            modified,
            file.id
        );
    }
    if let Some(token) = &page.next_page_token {
        println!();
        println!("More files: --page-token {token}");
    }
}

fn print_file(file: &DriveFile) {
    println!("Name:     {}", file.name);
    println!("ID:       {}", file.id);
    println!("Type:     {}", file.mime_type);
    if let Some(size) = file.size {
        println!("Size:     {}", format_size(size));
    }
    if let Some(modified) = &file.modified_time {
        println!("Modified: {}", format_datetime(modified));
    }
    println!(
        "Parents:  {}",
        or_dash(Some(file.parents.join(", ").as_str()))
    );
    println!("Link:     {}", or_dash(file.web_view_link.as_deref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_name_defaults_to_file_name() {
        assert_eq!(file_name(Path::new("/tmp/notes/lab-3.pdf")).unwrap(), "lab-3.pdf");
        assert!(file_name(Path::new("/")).is_err());
    }
}
