// Axum fixture: a small bookshop API in a single file
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// An author of books
#[derive(Debug, Serialize, Deserialize)]
#[has_many(Book, foreign_key = "author_id")]
pub struct Author {
    pub id: i64,
    pub name: String,
}

/// A book in the catalogue
#[derive(Debug, Serialize, Deserialize)]
#[belongs_to(Author)]
pub struct Book {
    pub id: i64,
    pub title: String,
    /// Year of first publication
    /// @var int|null
    pub year: serde_json::Value,
    /// @var string
    pub pages: i32,
}

#[derive(Debug, Deserialize)]
#[rules(title = "required|string|min:1|max:200")]
pub struct NewBook {
    pub title: Option<String>,
    pub author_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BookFilter {
    pub author: Option<String>,
    pub page: u32,
}

/// List books
///
/// Books are ordered by title.
async fn list_books(State(db): State<Db>, Query(filter): Query<BookFilter>) -> Json<Vec<Book>> {
    Json(vec![])
}

/// Show one book
/// @response 404 no such book
async fn show_book(Path(id): Path<i64>) -> Json<Book> {
    todo!()
}

/// Add a book
#[api(security = "bearer")]
async fn create_book(State(db): State<Db>, Json(input): Json<NewBook>) -> Json<Book> {
    todo!()
}

/// Remove a book
#[deprecated]
async fn delete_book(Path(id): Path<i64>) {}

async fn health() -> &'static str {
    "OK"
}

fn book_routes() -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/:id", get(show_book).delete(delete_book))
}

pub fn app() -> Router {
    Router::new()
        .nest("/api/books", book_routes())
        .route("/health", get(health))
}
