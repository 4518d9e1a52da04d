use rocket::Route;

mod admin;
mod public;
mod voter;

pub use admin::{AdminKey, ADMIN_KEY_HEADER};

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(public::routes());
    routes.extend(voter::routes());
    routes
}
