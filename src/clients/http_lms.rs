//! LMS REST API 客户端
//!
//! 封装登录、学生 / 测验查询、提交创建、答案上传和定稿。
//! 令牌、学生列表和测验 ID 在首次使用时获取并缓存，整个运行期间共享。
//! 已有的提交在返回前先调整到 `attempting` 状态（见 `submission_state`）。
use crate::clients::submission_state::{
    ensure_attempting, GradingWait, JobStatus, SubmissionAdmin, WorkflowState,
};
use crate::clients::{AnswerSlot, AssessmentSelector, LmsClient, SubmissionHandle};
use crate::config::{LmsConfig, OperationalConfig};
use crate::error::SubmissionError;
use crate::models::Identity;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CourseUser {
    id: u64,
    name: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<CourseUser>,
}

#[derive(Debug, Deserialize)]
struct Titled {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    categories: Vec<Titled>,
}

#[derive(Debug, Deserialize)]
struct AssessmentsResponse {
    assessments: Vec<Titled>,
}

#[derive(Debug, Deserialize)]
struct SubmissionSummary {
    id: u64,
    course_user_id: u64,
    #[serde(default)]
    workflow_state: WorkflowState,
}

#[derive(Debug, Deserialize)]
struct SubmissionsResponse {
    submissions: Vec<SubmissionSummary>,
}

#[derive(Debug, Deserialize)]
struct CreatedSubmission {
    id: u64,
}

/// 强制提交 / 撤回提交返回的后台任务
#[derive(Debug, Deserialize)]
struct JobSubmitted {
    #[serde(alias = "jobUrl")]
    job_url: String,
}

#[derive(Debug, Deserialize)]
struct QuestionInfo {
    question_title: String,
    answer_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AnswerFile {
    id: u64,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct AnswerInfo {
    id: u64,
    #[serde(default)]
    files: Vec<AnswerFile>,
}

#[derive(Debug, Deserialize)]
struct SubmissionEdit {
    questions: Vec<QuestionInfo>,
    answers: Vec<AnswerInfo>,
}

/// LMS 客户端
pub struct HttpLmsClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    token: OnceCell<String>,
    students: OnceCell<Vec<CourseUser>>,
    assessment_id: OnceCell<u64>,
    wait: GradingWait,
}

impl HttpLmsClient {
    /// 创建客户端（不会立即联网）
    ///
    /// # 参数
    /// - `config`: LMS 地址和凭据
    /// - `operational`: 请求超时，以及等待后台任务 / 自动评分的时间
    pub fn new(config: &LmsConfig, operational: &OperationalConfig) -> Result<Self, SubmissionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(operational.request_timeout_secs))
            .build()
            .map_err(|e| SubmissionError::Transient(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: OnceCell::new(),
            students: OnceCell::new(),
            assessment_id: OnceCell::new(),
            wait: GradingWait::from_config(operational),
        })
    }

    /// 相对路径拼接到 LMS 地址，绝对地址原样返回
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn token(&self) -> Result<&str, SubmissionError> {
        let token = self
            .token
            .get_or_try_init(|| async {
                debug!("正在登录 LMS: {}", self.username);
                let request = self.client.post(self.url("/api/v1/login")).json(&json!({
                    "username": self.username,
                    "password": self.password,
                }));
                let response: LoginResponse = send_json(request, "login").await?;
                info!("✓ 已登录 LMS ({})", self.username);
                Ok::<_, SubmissionError>(response.access_token)
            })
            .await?;
        Ok(token.as_str())
    }

    async fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, SubmissionError> {
        let token = self.token().await?;
        Ok(self.client.request(method, self.url(path)).bearer_auth(token))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, SubmissionError> {
        send_json(self.authed(Method::GET, path).await?, what).await
    }

    async fn students(&self, course_id: u64) -> Result<&[CourseUser], SubmissionError> {
        let students = self
            .students
            .get_or_try_init(|| async {
                let path = format!("/courses/{}/users/students.json", course_id);
                let response: UsersResponse = self.get(&path, "course students").await?;
                info!("✓ 课程 {} 共 {} 名学生", course_id, response.users.len());
                Ok::<_, SubmissionError>(response.users)
            })
            .await?;
        Ok(students.as_slice())
    }

    async fn assessment_id(&self, selector: &AssessmentSelector) -> Result<u64, SubmissionError> {
        let id = self
            .assessment_id
            .get_or_try_init(|| async {
                let path = format!("/courses/{}/assessments/categories.json", selector.course_id);
                let categories: CategoriesResponse = self.get(&path, "assessment categories").await?;
                let category = find_titled(
                    &categories.categories,
                    &selector.category,
                    "assessment category",
                )?;

                let path = format!(
                    "/courses/{}/assessments.json?category={}",
                    selector.course_id, category
                );
                let assessments: AssessmentsResponse = self.get(&path, "assessments").await?;
                let id = find_titled(&assessments.assessments, &selector.title, "assessment")?;
                info!(
                    "✓ 找到测验 '{}' (分类 '{}')",
                    selector.title, selector.category
                );
                Ok::<_, SubmissionError>(id)
            })
            .await?;
        Ok(*id)
    }

    fn submissions_path(selector: &AssessmentSelector, assessment_id: u64) -> String {
        format!(
            "/courses/{}/assessments/{}/submissions",
            selector.course_id, assessment_id
        )
    }
}

#[async_trait]
impl LmsClient for HttpLmsClient {
    async fn find_or_create_submission(
        &self,
        selector: &AssessmentSelector,
        identity: &Identity,
    ) -> Result<SubmissionHandle, SubmissionError> {
        let assessment_id = self.assessment_id(selector).await?;
        let students = self.students(selector.course_id).await?;
        let student = find_student(students, identity)?;
        let base = Self::submissions_path(selector, assessment_id);

        let existing: SubmissionsResponse = self.get(&format!("{}.json", base), "submissions").await?;
        let submission_id = match existing
            .submissions
            .iter()
            .find(|s| s.course_user_id == student.id)
        {
            Some(found) => {
                if found.workflow_state != WorkflowState::Attempting {
                    let admin = HttpSubmissionAdmin {
                        client: self,
                        base: &base,
                        course_user_id: student.id,
                    };
                    ensure_attempting(&admin, found.id, found.workflow_state, &self.wait).await?;
                }
                found.id
            }
            None => {
                debug!("为 {} 创建新的提交", identity.key);
                let request = self
                    .authed(Method::POST, &format!("{}.json", base))
                    .await?
                    .json(&json!({ "course_user_id": student.id }));
                let created: CreatedSubmission = send_json(request, "submission").await?;
                created.id
            }
        };

        let edit: SubmissionEdit = self
            .get(&format!("{}/{}/edit.json", base, submission_id), "submission")
            .await?;

        Ok(SubmissionHandle {
            course_id: selector.course_id,
            assessment_id,
            submission_id,
            course_user_id: student.id,
            identity_key: identity.key.clone(),
            answers: answer_slots(edit),
        })
    }

    async fn upload_answer(
        &self,
        handle: &SubmissionHandle,
        question_title: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), SubmissionError> {
        let slot = handle.answer_for(question_title)?;
        let path = format!(
            "/courses/{}/assessments/{}/submissions/{}/answers/{}.json",
            handle.course_id, handle.assessment_id, handle.submission_id, slot.answer_id
        );

        let file = json!({
            "id": slot.file_id,
            "filename": slot.filename.as_deref().unwrap_or(filename),
            "content": content,
        });
        let request = self
            .authed(Method::PATCH, &path)
            .await?
            .json(&json!({ "answer": { "id": slot.answer_id, "files_attributes": [file] } }));
        send_empty(request, "answer").await
    }

    async fn finalize_submission(&self, handle: &SubmissionHandle) -> Result<(), SubmissionError> {
        let path = format!(
            "/courses/{}/assessments/{}/submissions/{}.json",
            handle.course_id, handle.assessment_id, handle.submission_id
        );
        let request = self
            .authed(Method::PATCH, &path)
            .await?
            .json(&json!({ "submission": { "finalise": true } }));
        send_empty(request, "submission").await
    }
}

/// 单个学生提交的管理操作
struct HttpSubmissionAdmin<'a> {
    client: &'a HttpLmsClient,
    /// 测验提交列表路径（不含 `.json`）
    base: &'a str,
    course_user_id: u64,
}

impl HttpSubmissionAdmin<'_> {
    async fn start_job(&self, action: &str) -> Result<String, SubmissionError> {
        let request = self
            .client
            .authed(Method::POST, &format!("{}/{}.json", self.base, action))
            .await?
            .json(&json!({ "course_user_ids": [self.course_user_id] }));
        let job: JobSubmitted = send_json(request, action).await?;
        debug!("后台任务已提交: {} → {}", action, job.job_url);
        Ok(job.job_url)
    }
}

#[async_trait]
impl SubmissionAdmin for HttpSubmissionAdmin<'_> {
    async fn refresh(&self) -> Result<WorkflowState, SubmissionError> {
        let response: SubmissionsResponse = self
            .client
            .get(&format!("{}.json", self.base), "submissions")
            .await?;
        response
            .submissions
            .iter()
            .find(|s| s.course_user_id == self.course_user_id)
            .map(|s| s.workflow_state)
            .ok_or_else(|| SubmissionError::NotFound {
                what: format!("submission of course user {}", self.course_user_id),
            })
    }

    async fn force_submit(&self) -> Result<String, SubmissionError> {
        self.start_job("force_submit_all").await
    }

    async fn unsubmit(&self) -> Result<String, SubmissionError> {
        self.start_job("unsubmit_all").await
    }

    async fn job_status(&self, job_url: &str) -> Result<JobStatus, SubmissionError> {
        self.client.get(job_url, "job").await
    }
}

/// 按邮箱匹配学生，其次按姓名
fn find_student<'a>(
    students: &'a [CourseUser],
    identity: &Identity,
) -> Result<&'a CourseUser, SubmissionError> {
    let by_email = (!identity.email.is_empty())
        .then(|| {
            students
                .iter()
                .find(|s| s.email.eq_ignore_ascii_case(&identity.email))
        })
        .flatten();
    by_email
        .or_else(|| students.iter().find(|s| s.name == identity.name))
        .ok_or_else(|| SubmissionError::NoAccount {
            name: identity.name.clone(),
            email: identity.email.clone(),
        })
}

fn find_titled(items: &[Titled], title: &str, what: &str) -> Result<u64, SubmissionError> {
    items
        .iter()
        .find(|item| item.title == title)
        .map(|item| item.id)
        .ok_or_else(|| SubmissionError::NotFound {
            what: format!("{} '{}'", what, title),
        })
}

fn answer_slots(edit: SubmissionEdit) -> HashMap<String, AnswerSlot> {
    let answers: HashMap<u64, &AnswerInfo> = edit.answers.iter().map(|a| (a.id, a)).collect();
    edit.questions
        .iter()
        .filter_map(|q| {
            let answer_id = q.answer_id?;
            let file = answers.get(&answer_id).and_then(|a| a.files.first());
            Some((
                q.question_title.clone(),
                AnswerSlot {
                    answer_id,
                    file_id: file.map(|f| f.id),
                    filename: file.map(|f| f.filename.clone()),
                },
            ))
        })
        .collect()
}

/// 把 HTTP 状态码归类为提交错误
fn classify_status(status: StatusCode, what: &str, body: &str) -> Result<(), SubmissionError> {
    if status.is_success() {
        return Ok(());
    }
    let message = crate::utils::logging::truncate_text(body.trim(), 200);
    Err(match status.as_u16() {
        401 | 403 => SubmissionError::Auth(format!("{} ({})", status, what)),
        404 => SubmissionError::NotFound {
            what: what.to_string(),
        },
        408 | 429 => SubmissionError::Transient(format!("{} for {}", status, what)),
        code if code >= 500 => SubmissionError::Transient(format!("{} for {}", status, what)),
        code => SubmissionError::Rejected {
            status: code,
            message,
        },
    })
}

fn transport_error(e: reqwest::Error, what: &str) -> SubmissionError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SubmissionError::Transient(format!("{}: {}", what, e))
    } else {
        SubmissionError::Rejected {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            message: e.to_string(),
        }
    }
}

async fn send_raw(request: RequestBuilder, what: &str) -> Result<String, SubmissionError> {
    let response = request.send().await.map_err(|e| transport_error(e, what))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(e, what))?;
    classify_status(status, what, &body)?;
    Ok(body)
}

async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    what: &str,
) -> Result<T, SubmissionError> {
    let body = send_raw(request, what).await?;
    serde_json::from_str(&body).map_err(|e| SubmissionError::Rejected {
        status: 200,
        message: format!("unexpected {} response: {}", what, e),
    })
}

async fn send_empty(request: RequestBuilder, what: &str) -> Result<(), SubmissionError> {
    send_raw(request, what).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn students() -> Vec<CourseUser> {
        vec![
            CourseUser {
                id: 7,
                name: "John Doe".into(),
                email: "John@Example.com".into(),
            },
            CourseUser {
                id: 8,
                name: "Jane Roe".into(),
                email: "jane.roe@other.org".into(),
            },
        ]
    }

    #[test]
    fn test_student_matched_by_email_then_name() {
        let students = students();
        let by_email = Identity::new("plab1001", "Johnny", "john@example.com");
        assert_eq!(find_student(&students, &by_email).unwrap().id, 7);

        let by_name = Identity::new("plab1002", "Jane Roe", "jane@example.com");
        assert_eq!(find_student(&students, &by_name).unwrap().id, 8);

        let nobody = Identity::new("plab1003", "Ghost", "ghost@example.com");
        assert!(matches!(
            find_student(&students, &nobody),
            Err(SubmissionError::NoAccount { .. })
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK, "answer", "").is_ok());
        assert!(classify_status(StatusCode::UNAUTHORIZED, "answer", "")
            .unwrap_err()
            .is_fatal());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "answer", "")
            .unwrap_err()
            .is_transient());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "answer", "bad payload"),
            Err(SubmissionError::Rejected { status: 422, .. })
        ));
    }

    #[test]
    fn test_submission_state_defaults_to_attempting() {
        let response: SubmissionsResponse = serde_json::from_value(json!({
            "submissions": [
                { "id": 1, "course_user_id": 7, "workflow_state": "published" },
                { "id": 2, "course_user_id": 8 }
            ]
        }))
        .unwrap();

        assert_eq!(response.submissions[0].workflow_state, WorkflowState::Published);
        assert_eq!(response.submissions[1].workflow_state, WorkflowState::Attempting);
    }

    #[test]
    fn test_job_url_accepts_both_spellings() {
        let job: JobSubmitted = serde_json::from_value(json!({ "jobUrl": "/jobs/5" })).unwrap();
        assert_eq!(job.job_url, "/jobs/5");
        let job: JobSubmitted = serde_json::from_value(json!({ "job_url": "/jobs/6" })).unwrap();
        assert_eq!(job.job_url, "/jobs/6");
    }

    #[test]
    fn test_job_url_may_be_absolute() {
        let config = LmsConfig {
            base_url: "https://lms.test/".into(),
            username: "tutor".into(),
            password: "secret".into(),
            course_id: 42,
            assessment_category: "Practical Exams".into(),
            assessment_title: "PE1".into(),
        };
        let client = HttpLmsClient::new(&config, &OperationalConfig::default()).unwrap();
        assert_eq!(client.url("/jobs/5"), "https://lms.test/jobs/5");
        assert_eq!(client.url("https://jobs.lms.test/5"), "https://jobs.lms.test/5");
    }

    #[test]
    fn test_answer_slots_follow_question_titles() {
        let edit: SubmissionEdit = serde_json::from_value(json!({
            "questions": [
                { "question_title": "Question 1A", "answer_id": 11 },
                { "question_title": "Question 1B", "answer_id": null }
            ],
            "answers": [
                { "id": 11, "files": [{ "id": 99, "filename": "main.py" }] }
            ]
        }))
        .unwrap();

        let slots = answer_slots(edit);
        assert_eq!(slots.len(), 1);
        let slot = &slots["Question 1A"];
        assert_eq!(slot.answer_id, 11);
        assert_eq!(slot.file_id, Some(99));
        assert_eq!(slot.filename.as_deref(), Some("main.py"));
    }
}
