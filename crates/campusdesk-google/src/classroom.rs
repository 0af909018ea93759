//! Google Classroom client.
//!
//! Read operations follow `nextPageToken` to the end. Submission state
//! changes (`turnIn`, `reclaim`) are sent as-is; Classroom decides whether
//! the transition is allowed.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::{try_join, try_join3};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApiResult;
use crate::rest::{Page, RestClient};
use crate::transport::HttpRequest;

const PAGE_SIZE: &str = "100";

/// A course the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_link: Option<String>,
}

/// Calendar date as Classroom sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

/// Time of day (UTC) as Classroom sends it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
}

/// An assignment, question or material post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseWork {
    pub id: String,
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<ClassDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
}

impl CourseWork {
    /// Due instant. A due date without a time means the end of that day.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        let date = self.due_date?;
        let day = NaiveDate::from_ymd_opt(date.year, date.month, date.day)?;
        let time = match self.due_time {
            Some(t) => day.and_hms_opt(t.hours, t.minutes, 0)?,
            None => day.and_hms_opt(23, 59, 59)?,
        };
        Some(time.and_utc())
    }
}

/// A stream post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_link: Option<String>,
}

/// A student or teacher of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterMember {
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// Everyone in a course.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    pub students: Vec<RosterMember>,
    pub teachers: Vec<RosterMember>,
}

/// Where a student's submission stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    NotStarted,
    Draft,
    TurnedIn,
    Returned,
    Reclaimed,
}

impl SubmissionState {
    /// Maps Classroom's `state` field. Unknown values count as not started.
    pub fn from_api(state: &str) -> Self {
        match state {
            "CREATED" => Self::Draft,
            "TURNED_IN" => Self::TurnedIn,
            "RETURNED" => Self::Returned,
            "RECLAIMED_BY_STUDENT" => Self::Reclaimed,
            _ => Self::NotStarted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Draft => "draft",
            Self::TurnedIn => "turned_in",
            Self::Returned => "returned",
            Self::Reclaimed => "reclaimed",
        }
    }
}

/// A file or link attached to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    DriveFile {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Link {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl Attachment {
    pub fn drive_file(id: impl Into<String>) -> Self {
        Self::DriveFile {
            id: id.into(),
            title: None,
        }
    }

    pub fn link(url: impl Into<String>) -> Self {
        Self::Link {
            url: url.into(),
            title: None,
        }
    }

    fn to_api(&self) -> serde_json::Value {
        match self {
            Self::DriveFile { id, .. } => json!({"driveFile": {"id": id}}),
            Self::Link { url, .. } => json!({"link": {"url": url}}),
        }
    }
}

/// The signed-in student's submission for one piece of coursework.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub course_id: String,
    pub course_work_id: String,
    pub state: SubmissionState,
    pub late: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_grade: Option<f64>,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_link: Option<String>,
}

/// Course page data assembled by [`ClassroomClient::load_course_details`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetails {
    pub coursework: Vec<CourseWork>,
    pub announcements: Vec<Announcement>,
    pub roster: Roster,
    /// Submissions keyed by coursework id.
    pub submissions: BTreeMap<String, Submission>,
    pub dropped_submissions: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSubmission {
    id: String,
    #[serde(default)]
    course_id: String,
    #[serde(default)]
    course_work_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    late: bool,
    assigned_grade: Option<f64>,
    alternate_link: Option<String>,
    assignment_submission: Option<ApiAssignmentSubmission>,
}

#[derive(Debug, Deserialize)]
struct ApiAssignmentSubmission {
    #[serde(default)]
    attachments: Vec<ApiAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttachment {
    drive_file: Option<ApiDriveFile>,
    link: Option<ApiLink>,
}

#[derive(Debug, Deserialize)]
struct ApiDriveFile {
    id: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiLink {
    url: String,
    title: Option<String>,
}

impl From<ApiSubmission> for Submission {
    fn from(api: ApiSubmission) -> Self {
        let attachments = api
            .assignment_submission
            .map(|a| a.attachments)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| match (a.drive_file, a.link) {
                (Some(file), _) => Some(Attachment::DriveFile {
                    id: file.id,
                    title: file.title,
                }),
                (None, Some(link)) => Some(Attachment::Link {
                    url: link.url,
                    title: link.title,
                }),
                // YouTube videos and forms are not surfaced.
                (None, None) => None,
            })
            .collect();
        Self {
            id: api.id,
            course_id: api.course_id,
            course_work_id: api.course_work_id,
            state: SubmissionState::from_api(&api.state),
            late: api.late,
            assigned_grade: api.assigned_grade,
            attachments,
            alternate_link: api.alternate_link,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMember {
    user_id: String,
    profile: Option<ApiProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiProfile {
    name: Option<ApiName>,
    email_address: Option<String>,
    photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiName {
    full_name: Option<String>,
}

impl From<ApiMember> for RosterMember {
    fn from(api: ApiMember) -> Self {
        let (name, email, photo_url) = match api.profile {
            Some(profile) => (
                profile.name.and_then(|n| n.full_name).unwrap_or_default(),
                profile.email_address,
                // Classroom hands out protocol-relative photo URLs.
                profile.photo_url.map(|url| match url.strip_prefix("//") {
                    Some(rest) => format!("https://{rest}"),
                    None => url,
                }),
            ),
            None => Default::default(),
        };
        Self {
            user_id: api.user_id,
            name,
            email,
            photo_url,
        }
    }
}

macro_rules! page_type {
    ($name:ident, $field:ident, $item:ty) => {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct $name {
            #[serde(default)]
            $field: Vec<$item>,
            next_page_token: Option<String>,
        }

        impl Page for $name {
            type Item = $item;

            fn into_parts(self) -> (Vec<$item>, Option<String>) {
                (self.$field, self.next_page_token)
            }
        }
    };
}

page_type!(CoursePage, courses, Course);
page_type!(CourseWorkPage, course_work, CourseWork);
page_type!(AnnouncementPage, announcements, Announcement);
page_type!(StudentPage, students, ApiMember);
page_type!(TeacherPage, teachers, ApiMember);
page_type!(SubmissionPage, student_submissions, ApiSubmission);

fn segment(value: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(value)
}

/// Classroom operations for the signed-in user.
#[derive(Debug, Clone)]
pub struct ClassroomClient {
    rest: RestClient,
}

impl ClassroomClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// A copy whose calls stop at `cancel`.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self::new(self.rest.scoped(cancel))
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    fn course_url(&self, course_id: &str, rest: &str) -> String {
        self.rest
            .endpoint(&format!("courses/{}/{rest}", segment(course_id)))
    }

    fn submission_url(&self, course_id: &str, coursework_id: &str, suffix: &str) -> String {
        self.course_url(
            course_id,
            &format!("courseWork/{}/studentSubmissions{suffix}", segment(coursework_id)),
        )
    }

    /// Active courses.
    pub async fn list_courses(&self) -> ApiResult<Vec<Course>> {
        let url = self.rest.endpoint("courses");
        self.rest
            .collect_pages::<CoursePage, _>(|token| {
                HttpRequest::get(&url)
                    .query("courseStates", "ACTIVE")
                    .query("pageSize", PAGE_SIZE)
                    .query_opt("pageToken", token)
            })
            .await
    }

    pub async fn list_coursework(&self, course_id: &str) -> ApiResult<Vec<CourseWork>> {
        let url = self.course_url(course_id, "courseWork");
        self.rest
            .collect_pages::<CourseWorkPage, _>(|token| {
                HttpRequest::get(&url)
                    .query("pageSize", PAGE_SIZE)
                    .query_opt("pageToken", token)
            })
            .await
    }

    pub async fn list_announcements(&self, course_id: &str) -> ApiResult<Vec<Announcement>> {
        let url = self.course_url(course_id, "announcements");
        self.rest
            .collect_pages::<AnnouncementPage, _>(|token| {
                HttpRequest::get(&url)
                    .query("pageSize", PAGE_SIZE)
                    .query_opt("pageToken", token)
            })
            .await
    }

    /// Students and teachers, fetched concurrently.
    pub async fn get_roster(&self, course_id: &str) -> ApiResult<Roster> {
        let students_url = self.course_url(course_id, "students");
        let teachers_url = self.course_url(course_id, "teachers");
        let students = self.rest.collect_pages::<StudentPage, _>(|token| {
            HttpRequest::get(&students_url)
                .query("pageSize", PAGE_SIZE)
                .query_opt("pageToken", token)
        });
        let teachers = self.rest.collect_pages::<TeacherPage, _>(|token| {
            HttpRequest::get(&teachers_url)
                .query("pageSize", PAGE_SIZE)
                .query_opt("pageToken", token)
        });
        let (students, teachers) = try_join(students, teachers).await?;
        Ok(Roster {
            students: students.into_iter().map(RosterMember::from).collect(),
            teachers: teachers.into_iter().map(RosterMember::from).collect(),
        })
    }

    /// The user's own submission, if Classroom has created one yet.
    pub async fn get_submission(
        &self,
        course_id: &str,
        coursework_id: &str,
    ) -> ApiResult<Option<Submission>> {
        let request = HttpRequest::get(self.submission_url(course_id, coursework_id, ""));
        let page: SubmissionPage = self.rest.fetch(request).await?;
        Ok(page
            .student_submissions
            .into_iter()
            .next()
            .map(Submission::from))
    }

    pub async fn turn_in(
        &self,
        course_id: &str,
        coursework_id: &str,
        submission_id: &str,
    ) -> ApiResult<()> {
        self.submission_action(course_id, coursework_id, submission_id, "turnIn")
            .await
    }

    pub async fn reclaim(
        &self,
        course_id: &str,
        coursework_id: &str,
        submission_id: &str,
    ) -> ApiResult<()> {
        self.submission_action(course_id, coursework_id, submission_id, "reclaim")
            .await
    }

    async fn submission_action(
        &self,
        course_id: &str,
        coursework_id: &str,
        submission_id: &str,
        action: &str,
    ) -> ApiResult<()> {
        let suffix = format!("/{}:{action}", segment(submission_id));
        let request =
            HttpRequest::post(self.submission_url(course_id, coursework_id, &suffix)).json(json!({}));
        self.rest.execute(request).await?;
        debug!(course_id, coursework_id, submission_id, action, "submission updated");
        Ok(())
    }

    /// Adds attachments to a draft submission.
    pub async fn modify_attachments(
        &self,
        course_id: &str,
        coursework_id: &str,
        submission_id: &str,
        attachments: &[Attachment],
    ) -> ApiResult<Submission> {
        let suffix = format!("/{}:modifyAttachments", segment(submission_id));
        let body = json!({
            "addAttachments": attachments.iter().map(Attachment::to_api).collect::<Vec<_>>()
        });
        let request =
            HttpRequest::post(self.submission_url(course_id, coursework_id, &suffix)).json(body);
        let updated: ApiSubmission = self.rest.fetch(request).await?;
        Ok(updated.into())
    }

    /// Coursework, announcements and roster concurrently, then the user's
    /// submission for each coursework one at a time.
    ///
    /// A failed submission lookup is counted in `dropped_submissions`; any
    /// other failure fails the whole load.
    pub async fn load_course_details(&self, course_id: &str) -> ApiResult<CourseDetails> {
        let (coursework, announcements, roster) = try_join3(
            self.list_coursework(course_id),
            self.list_announcements(course_id),
            self.get_roster(course_id),
        )
        .await?;

        let mut submissions = BTreeMap::new();
        let mut dropped_submissions = 0;
        for work in &coursework {
            match self.get_submission(course_id, &work.id).await {
                Ok(Some(submission)) => {
                    submissions.insert(work.id.clone(), submission);
                }
                Ok(None) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(course_id, coursework_id = %work.id, "skipping submission: {e}");
                    dropped_submissions += 1;
                }
            }
        }

        Ok(CourseDetails {
            coursework,
            announcements,
            roster,
            submissions,
            dropped_submissions,
        })
    }
}
