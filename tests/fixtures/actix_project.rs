// Actix-Web fixture: library loans API with attribute routes
use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Member {
    pub id: u32,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Loan {
    pub id: u64,
    pub member_id: u32,
    pub isbn: String,
    pub returned: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewLoan {
    #[validate(length(min = 10, max = 13))]
    pub isbn: String,
    pub days: Option<u16>,
}

/// List members
#[get("/members")]
async fn list_members() -> web::Json<Vec<Member>> {
    web::Json(vec![])
}

/// Show one member
#[get("/members/{id}")]
async fn show_member(path: web::Path<u32>) -> impl Responder {
    HttpResponse::Ok().finish()
}

/// Lend a book to a member
/// @response 409 already lent
#[post("/members/{member_id}/loans")]
async fn create_loan(member_id: web::Path<u32>, loan: web::Json<NewLoan>) -> web::Json<Loan> {
    todo!()
}

/// Return a book
#[put("/loans/{id}/return")]
async fn return_loan(id: web::Path<u64>) -> HttpResponse {
    HttpResponse::NoContent().finish()
}

#[delete("/loans/{id}")]
async fn delete_loan(id: web::Path<u64>) -> HttpResponse {
    HttpResponse::NoContent().finish()
}
