//! Google Classroom commands.

use campusdesk_google::{Attachment, Course, CourseDetails, Submission};

use crate::cli::ClassroomAction;
use crate::commands::App;
use crate::error::{ClientError, ClientResult};
use crate::output::{format_datetime, or_dash, truncate};

pub async fn run(app: &App, action: ClassroomAction) -> ClientResult<()> {
    let classroom = app.classroom();
    match action {
        ClassroomAction::Courses => {
            let result = classroom.list_courses().await;
            app.printer.emit(result, |courses| print_courses(courses))
        }
        ClassroomAction::Course { id } => {
            let result = classroom.load_course_details(&id).await;
            app.printer.emit(result, print_details)
        }
        ClassroomAction::Submission { course, work } => {
            let result = classroom.get_submission(&course, &work).await;
            app.printer.emit(result, |submission| match submission {
                Some(submission) => print_submission(submission),
                None => println!("No submission yet."),
            })
        }
        ClassroomAction::TurnIn {
            course,
            work,
            submission,
        } => {
            let result = classroom.turn_in(&course, &work, &submission).await;
            app.printer.emit(result, |_| println!("Turned in {submission}"))
        }
        ClassroomAction::Reclaim {
            course,
            work,
            submission,
        } => {
            let result = classroom.reclaim(&course, &work, &submission).await;
            app.printer.emit(result, |_| println!("Reclaimed {submission}"))
        }
        ClassroomAction::Attach {
            course,
            work,
            submission,
            drive_files,
            links,
        } => {
            let attachments = attachments(drive_files, links)?;
            let result = classroom
                .modify_attachments(&course, &work, &submission, &attachments)
                .await;
            app.printer.emit(result, print_submission)
        }
    }
}

fn attachments(drive_files: Vec<String>, links: Vec<String>) -> ClientResult<Vec<Attachment>> {
    let attachments: Vec<Attachment> = drive_files
        .into_iter()
        .map(Attachment::drive_file)
        .chain(links.into_iter().map(Attachment::link))
        .collect();
    if attachments.is_empty() {
        return Err(ClientError::Input(
            "give at least one --drive-file or --link".to_string(),
        ));
    }
    Ok(attachments)
}

fn print_courses(courses: &[Course]) {
    if courses.is_empty() {
        println!("No active courses.");
    }
    for course in courses {
        println!(
            "{:<40} {:<16} {:<10} {}",
            truncate(&course.name, 40),
            truncate(or_dash(course.section.as_deref()), 16),
            or_dash(course.room.as_deref()),
            course.id
        );
    }
}

fn print_details(details: &CourseDetails) {
    println!("Coursework");
    for work in &details.coursework {
        let due = work
            .due_at()
            .map(|at| format!("due {}", format_datetime(&at)))
            .unwrap_or_else(|| "no due date".to_string());
        let state = details
            .submissions
            .get(&work.id)
            .map(|s| s.state.as_str())
            .unwrap_or("-");
        println!(
            "  {:<40} {:<22} {:<12} {}",
            truncate(&work.title, 40),
            due,
            state,
            work.id
        );
    }
    if details.dropped_submissions > 0 {
        eprintln!(
            "warning: {} submissions could not be loaded",
            details.dropped_submissions
        );
    }

    println!();
    println!("Announcements");
    for announcement in &details.announcements {
        let when = announcement
            .creation_time
            .as_ref()
            .map(format_datetime)
            .unwrap_or_default();
        let first_line = announcement.text.lines().next().unwrap_or_default();
        println!("  {when:<16} {}", truncate(first_line, 60));
    }

    println!();
    println!(
        "Roster: {} teachers, {} students",
        details.roster.teachers.len(),
        details.roster.students.len()
    );
    for teacher in &details.roster.teachers {
        println!("  {} <{}>", teacher.name, or_dash(teacher.email.as_deref()));
    }
}

fn print_submission(submission: &Submission) {
    println!("Submission: {}", submission.id);
    println!(
        "State:      {}{}",
        submission.state.as_str(),
        if submission.late { " (late)" } else { "" }
    );
    if let Some(grade) = submission.assigned_grade {
        println!("Grade:      {grade}");
    }
    for attachment in &submission.attachments {
        match attachment {
            Attachment::DriveFile { id, title } => {
                println!("  drive  {} {id}", or_dash(title.as_deref()));
            }
            Attachment::Link { url, title } => {
                println!("  link   {} {url}", or_dash(title.as_deref()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_keep_order_by_kind() {
        let list = attachments(
            vec!["f1".to_string()],
            vec!["https://example.edu/lab".to_string()],
        )
        .unwrap();
        assert_eq!(
            list,
            vec![
                Attachment::drive_file("f1"),
                Attachment::link("https://example.edu/lab")
            ]
        );
    }

    #[test]
    fn empty_attachment_list_is_rejected() {
        assert!(matches!(
            attachments(vec![], vec![]),
            Err(ClientError::Input(_))
        ));
    }
}
