use crate::helpers::{body_bytes, body_json, generate_request, get_request, MultipartBody, TestApp};
use crate::support::{png, Script};
use axum::http::{header, StatusCode};
use imagegen_backend::domain::generation::{PollSettings, ProviderError, ProviderOperation};
use imagegen_backend::domain::quota::ServiceType;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn it_should_generate_and_serve_an_image() {
    let app = TestApp::new(vec![Script::Complete(png(7))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let body = MultipartBody::default()
        .text("prompt", "a red fox in the snow, watercolor")
        .text("originalPrompt", "a red fox in the snow")
        .text("size", "1792x1024")
        .text("model", "DALL-E 3")
        .finish();
    let response = app.send(generate_request(Some(&token), body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["provider"], "openai");
    assert_eq!(json["usage"]["usageCount"], 1);
    assert_eq!(json["usage"]["limitCount"], 1);
    assert_eq!(json["usage"]["remainingCount"], 0);
    assert_eq!(json["usage"]["planType"], "basic");

    let url = json["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/api/images/"));

    let input = app.openai.inputs.lock()[0].clone();
    assert_eq!(input.size.to_string(), "1792x1024");

    let image = app.send(get_request(&url, Some(&token))).await;
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(image).await, png(7).bytes);
}

#[tokio::test]
async fn it_should_pass_reference_images_and_mask_to_the_provider() {
    let app = TestApp::new(vec![Script::Complete(png(1))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let body = MultipartBody::default()
        .text("prompt", "make it night")
        .file("referenceImages", "day.png", "image/png", b"day-bytes")
        .file("referenceImages", "sky.png", "image/png", b"sky-bytes")
        .text("maskData", "data:image/png;base64,aGVsbG8=")
        .finish();
    let response = app.send(generate_request(Some(&token), body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let input = app.openai.inputs.lock()[0].clone();
    match input.operation {
        ProviderOperation::MultiImageEdit { images, mask } => {
            assert_eq!(images.len(), 2);
            assert_eq!(images[0].file_name, "day.png");
            assert_eq!(images[1].bytes, b"sky-bytes".to_vec());
            assert_eq!(mask, Some(b"hello".to_vec()));
        }
        other => panic!("expected a multi-image edit, got {:?}", other),
    }
}

#[tokio::test]
async fn it_should_refuse_a_second_image_on_the_basic_plan() {
    let app = TestApp::new(vec![Script::Complete(png(1)), Script::Complete(png(2))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let first = app
        .send(generate_request(
            Some(&token),
            MultipartBody::default().text("prompt", "one").finish(),
        ))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .send(generate_request(
            Some(&token),
            MultipartBody::default().text("prompt", "two").finish(),
        ))
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let json = body_json(second).await;
    assert!(json["error"].as_str().unwrap().contains("basic"));
    assert!(json["upgradeMessage"].is_string());
    assert_eq!(json["usage"]["remainingCount"], 0);
    assert_eq!(app.openai.calls(), 1);
}

#[tokio::test]
async fn it_should_require_a_prompt() {
    let app = TestApp::new(vec![Script::Complete(png(1))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let response = app
        .send(generate_request(
            Some(&token),
            MultipartBody::default().text("model", "DALL-E 3").finish(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.openai.calls(), 0);
    let record = app.usage.get(user_id, ServiceType::ImageGenerate).unwrap();
    assert_eq!(record.usage_count, 0);
}

#[tokio::test]
async fn it_should_answer_quota_before_validating_the_form() {
    let app = TestApp::new(vec![Script::Complete(png(1)), Script::Complete(png(2))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let first = app
        .send(generate_request(
            Some(&token),
            MultipartBody::default().text("prompt", "a quiet harbor").finish(),
        ))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    // No prompt at all, but the plan is already spent
    let response = app
        .send(generate_request(
            Some(&token),
            MultipartBody::default().text("size", "not-a-size").finish(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(app.openai.calls(), 1);
}

#[tokio::test]
async fn it_should_not_commit_usage_when_client_disconnects() {
    let app = TestApp::new(vec![Script::Hang]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let body = MultipartBody::default().text("prompt", "a slow sunrise").finish();
    let sent = tokio::time::timeout(
        Duration::from_millis(100),
        app.send(generate_request(Some(&token), body)),
    )
    .await;
    assert!(sent.is_err(), "request should still be in flight");

    // Let the aborted handler's drop guard fire
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(app.openai.calls(), 1);
    let record = app.usage.get(user_id, ServiceType::ImageGenerate).unwrap();
    assert_eq!(record.usage_count, 0);
    assert_eq!(app.artifacts.len(), 0);
}

#[tokio::test]
async fn it_should_cancel_the_upstream_job_when_client_disconnects() {
    let app = TestApp::with_poll(
        vec![Script::EndlessJob],
        PollSettings {
            interval: Duration::from_millis(5),
            max_attempts: 10_000,
        },
    );
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let body = MultipartBody::default().text("prompt", "a slow sunrise").finish();
    let sent = tokio::time::timeout(
        Duration::from_millis(100),
        app.send(generate_request(Some(&token), body)),
    )
    .await;
    assert!(sent.is_err(), "request should still be in flight");

    let cancelled = tokio::time::timeout(Duration::from_secs(2), async {
        while app.openai.cancelled.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(cancelled.is_ok(), "upstream job was never cancelled");
    assert_eq!(*app.openai.cancelled.lock(), vec!["openai-job-1".to_string()]);
    let record = app.usage.get(user_id, ServiceType::ImageGenerate).unwrap();
    assert_eq!(record.usage_count, 0);
    assert_eq!(app.artifacts.len(), 0);
}

#[tokio::test]
async fn it_should_reject_oversized_reference_images() {
    let app = TestApp::new(vec![Script::Complete(png(1))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);
    let too_big = vec![0u8; 4 * 1024 * 1024 + 1];

    let body = MultipartBody::default()
        .text("prompt", "x")
        .file("referenceImages", "huge.png", "image/png", &too_big)
        .finish();
    let response = app.send(generate_request(Some(&token), body)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("4MB"));
}

#[tokio::test]
async fn it_should_not_charge_when_every_provider_fails() {
    // OpenAI refuses the prompt and the unscripted Replicate fallback errors out
    let app = TestApp::new(vec![Script::Fail(ProviderError::PolicyViolation(
        "content_policy_violation".into(),
    ))]);
    let user_id = app.accounts.add_basic_user();
    let token = app.token_for(user_id);

    let body = MultipartBody::default()
        .text("prompt", "something forbidden")
        .finish();
    let response = app.send(generate_request(Some(&token), body)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("2 step(s)"));

    let record = app.usage.get(user_id, ServiceType::ImageGenerate).unwrap();
    assert_eq!(record.usage_count, 0);
    assert_eq!(app.artifacts.len(), 0);
}

#[tokio::test]
async fn it_should_hide_images_from_other_users() {
    let app = TestApp::new(vec![Script::Complete(png(1))]);
    let owner = app.accounts.add_basic_user();
    let stranger = app.accounts.add_basic_user();

    let response = app
        .send(generate_request(
            Some(&app.token_for(owner)),
            MultipartBody::default().text("prompt", "mine").finish(),
        ))
        .await;
    let url = body_json(response).await["url"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .send(get_request(&url, Some(&app.token_for(stranger))))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn it_should_require_authentication_to_generate() {
    let app = TestApp::new(vec![Script::Complete(png(1))]);

    let response = app
        .send(generate_request(
            None,
            MultipartBody::default().text("prompt", "x").finish(),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.openai.calls(), 0);
}
