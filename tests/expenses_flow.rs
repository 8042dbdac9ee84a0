mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

struct Company {
    reviewer_token: String,
    submitter_id: Uuid,
    submitter_token: String,
}

async fn seed_company(app: &TestApp, name: &str) -> Result<Company> {
    let company_id = app.insert_company(name).await?;
    let slug = name.to_ascii_lowercase().replace(' ', "-");
    let reviewer_email = format!("controller@{slug}.test");
    let submitter_email = format!("employee@{slug}.test");
    app.insert_profile(company_id, &reviewer_email, "controller").await?;
    let submitter_id = app.insert_profile(company_id, &submitter_email, "user").await?;
    Ok(Company {
        reviewer_token: app.login_token(&reviewer_email).await?,
        submitter_id,
        submitter_token: app.login_token(&submitter_email).await?,
    })
}

async fn submit_expense(app: &TestApp, token: &str, title: &str, amount: &str) -> Result<Uuid> {
    let response = app
        .post_json(
            "/api/expenses",
            &json!({
                "title": title,
                "amount": amount,
                "currency": "eur",
                "expense_date": "2025-03-14",
                "vendor_name": "Deutsche Bahn",
                "submit": true,
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = json_body(response).await?;
    assert_eq!(body["status"], "submitted");
    assert_eq!(body["currency"], "EUR");
    let id = body["id"].as_str().context("expense id missing")?;
    Ok(Uuid::parse_str(id)?)
}

fn ids(list: &Value) -> Vec<String> {
    list["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn approving_removes_expense_from_submitted_tab() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let acme = seed_company(&app, "Acme").await?;

    let train = submit_expense(&app, &acme.submitter_token, "Train to Berlin", "100.00").await?;
    let lunch = submit_expense(&app, &acme.submitter_token, "Client lunch", "50.00").await?;

    let response = app
        .get("/api/expenses?tab=submitted", Some(&acme.reviewer_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let list: Value = json_body(response).await?;
    assert_eq!(list["total"], 2);
    assert_eq!(list["tab_counts"]["submitted"], 2);

    let response = app
        .post_json(
            &format!("/api/expenses/{train}/status"),
            &json!({ "status": "approved" }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let item: Value = json_body(response).await?;
    assert_eq!(item["status"], "approved");

    let list: Value = json_body(
        app.get("/api/expenses?tab=submitted", Some(&acme.reviewer_token))
            .await?,
    )
    .await?;
    assert_eq!(ids(&list), vec![lunch.to_string()]);

    let approved: Value = json_body(
        app.get("/api/expenses?tab=approved", Some(&acme.reviewer_token))
            .await?,
    )
    .await?;
    assert_eq!(ids(&approved), vec![train.to_string()]);

    let notifications = app.notifications_for(acme.submitter_id).await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].expense_id, Some(train));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reject_requires_note_and_submitters_cannot_review() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let acme = seed_company(&app, "Acme").await?;
    let expense = submit_expense(&app, &acme.submitter_token, "Hotel", "240.00").await?;
    let path = format!("/api/expenses/{expense}/status");

    let response = app
        .post_json(
            &path,
            &json!({ "status": "rejected", "notes": "   " }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.expense(expense).await?.status, "submitted");

    let response = app
        .post_json(
            &path,
            &json!({ "status": "approved" }),
            Some(&acme.submitter_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &path,
            &json!({ "status": "rejected", "notes": "Missing itemised bill" }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let stored = app.expense(expense).await?;
    assert_eq!(stored.status, "rejected");
    assert_eq!(stored.review_notes.as_deref(), Some("Missing itemised bill"));

    // Rejected is terminal.
    let response = app
        .post_json(
            &path,
            &json!({ "status": "approved" }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bulk_approve_reports_partial_failure() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let acme = seed_company(&app, "Acme").await?;
    let globex = seed_company(&app, "Globex").await?;

    let first = submit_expense(&app, &acme.submitter_token, "Taxi", "18.40").await?;
    let second = submit_expense(&app, &acme.submitter_token, "Parking", "12.00").await?;
    let foreign = submit_expense(&app, &globex.submitter_token, "Flight", "310.00").await?;

    let response = app
        .post_json(
            "/api/expenses/bulk/status",
            &json!({ "expense_ids": [first, second], "status": "approved" }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: Value = json_body(response).await?;
    assert_eq!(outcome["updated"], 2);

    let third = submit_expense(&app, &acme.submitter_token, "Fuel", "60.00").await?;
    let response = app
        .post_json(
            "/api/expenses/bulk/status",
            &json!({ "expense_ids": [third, foreign], "status": "approved" }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = json_body(response).await?;
    assert_eq!(body["error"], "1 of 2 expense updates failed");

    assert_eq!(app.expense(third).await?.status, "approved");
    assert_eq!(app.expense(foreign).await?.status, "submitted");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn amount_range_and_submitter_scope() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let acme = seed_company(&app, "Acme").await?;
    let cheap = submit_expense(&app, &acme.submitter_token, "Coffee", "4.50").await?;
    let mid = submit_expense(&app, &acme.submitter_token, "Books", "45.00").await?;
    let pricey = submit_expense(&app, &acme.submitter_token, "Monitor", "450.00").await?;

    let list: Value = json_body(
        app.get(
            "/api/expenses?min_amount=4.5&max_amount=45",
            Some(&acme.reviewer_token),
        )
        .await?,
    )
    .await?;
    let mut found = ids(&list);
    found.sort();
    let mut expected = vec![cheap.to_string(), mid.to_string()];
    expected.sort();
    assert_eq!(found, expected);

    let list: Value = json_body(
        app.get("/api/expenses?min_amount=500", Some(&acme.reviewer_token))
            .await?,
    )
    .await?;
    assert_eq!(list["total"], 0);

    let list: Value = json_body(
        app.get(
            &format!("/api/expenses?search=monitor&expanded={pricey}"),
            Some(&acme.submitter_token),
        )
        .await?,
    )
    .await?;
    assert_eq!(ids(&list), vec![pricey.to_string()]);
    assert_eq!(list["expanded"]["id"], pricey.to_string());

    let response = app
        .get("/api/expenses?min_amount=abc", Some(&acme.reviewer_token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn assignment_creates_pending_expense_for_assignee() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let acme = seed_company(&app, "Acme").await?;
    let globex = seed_company(&app, "Globex").await?;

    let response = app
        .post_json(
            "/api/expenses/assignments",
            &json!({
                "assignee_id": acme.submitter_id,
                "title": "Submit conference receipts",
                "message": "Please upload the hotel invoice",
            }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let outcome: Value = json_body(response).await?;
    let expected_due = (Utc::now().date_naive() + Duration::days(7)).to_string();
    assert_eq!(outcome["due_date"], expected_due);
    assert_eq!(outcome["notified"], true);

    let expense_id = Uuid::parse_str(outcome["expense_id"].as_str().context("id missing")?)?;
    let stored = app.expense(expense_id).await?;
    assert_eq!(stored.status, "assignment_pending");
    assert_eq!(stored.submitter_id, acme.submitter_id);

    let mine: Value = json_body(
        app.get(
            "/api/expenses?tab=assignment_pending",
            Some(&acme.submitter_token),
        )
        .await?,
    )
    .await?;
    assert_eq!(ids(&mine), vec![expense_id.to_string()]);

    let response = app
        .patch_json(
            &format!("/api/expenses/{expense_id}"),
            &json!({ "amount": "189.90", "submit": true }),
            Some(&acme.submitter_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.expense(expense_id).await?.status, "submitted");

    let response = app
        .post_json(
            "/api/expenses/assignments",
            &json!({ "assignee_id": globex.submitter_id, "title": "Foreign" }),
            Some(&acme.reviewer_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn receipts_upload_and_queue_analysis() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let acme = seed_company(&app, "Acme").await?;

    let response = app
        .post_json(
            "/api/expenses",
            &json!({ "title": "Taxi", "amount": "23.00", "expense_date": "2025-03-14" }),
            Some(&acme.submitter_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let draft: Value = json_body(response).await?;
    assert_eq!(draft["status"], "draft");
    let expense_id = draft["id"].as_str().context("id missing")?.to_string();

    let response = app
        .upload_file(
            &format!("/api/expenses/{expense_id}/receipts"),
            "taxi receipt.pdf",
            "application/pdf",
            b"%PDF-1.4 receipt",
            &acme.submitter_token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let receipt: Value = json_body(response).await?;
    let receipt_id = receipt["id"].as_str().context("receipt id missing")?.to_string();
    assert_eq!(app.receipts().object_count().await, 1);

    let url: Value = json_body(
        app.get(
            &format!("/api/receipts/{receipt_id}/url"),
            Some(&acme.submitter_token),
        )
        .await?,
    )
    .await?;
    assert_eq!(url["expires_in"], 300);

    let response = app
        .post_json(
            &format!("/api/receipts/{receipt_id}/analyze"),
            &json!({}),
            Some(&acme.submitter_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let first: Value = json_body(response).await?;

    // A second request reuses the queued job.
    let second: Value = json_body(
        app.post_json(
            &format!("/api/receipts/{receipt_id}/analyze"),
            &json!({}),
            Some(&acme.submitter_token),
        )
        .await?,
    )
    .await?;
    assert_eq!(first["job_id"], second["job_id"]);

    let detail: Value = json_body(
        app.get(&format!("/api/expenses/{expense_id}"), Some(&acme.submitter_token))
            .await?,
    )
    .await?;
    assert_eq!(detail["active_receipt"]["id"], receipt_id);

    app.cleanup().await?;
    Ok(())
}
