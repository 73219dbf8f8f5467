// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn http_status_matches_code() {
    assert_eq!(ErrorCode::NotFound.http_status(), 404);
    assert_eq!(ErrorCode::BadRequest.http_status(), 400);
    assert_eq!(ErrorCode::Internal.http_status(), 500);
}

#[test]
fn error_body_carries_message() {
    let body = ErrorCode::NotFound.to_error_body("no such app run");
    assert_eq!(body.code, "NOT_FOUND");
    assert_eq!(body.message, "no such app run");
}

#[test]
fn display_matches_as_str() {
    assert_eq!(ErrorCode::Cancelled.to_string(), "CANCELLED");
}
