use genlearn_portal::{Config, build_rocket};
use rocket::{Build, Rocket};

#[rocket::launch]
fn rocket() -> Rocket<Build> {
    dotenvy::dotenv().ok();

    match Config::load() {
        Ok(config) => build_rocket(config),
        Err(err) => panic!("Failed to load configuration: {}", err),
    }
}
