//! Inventory entities and their relationships.
//!
//! Foreign keys are plain `*_id` integer fields; the helpers on each type
//! resolve them through a [`Store`] scope, so repeated lookups inside one
//! scope return the same instance.

use crate::config::StoreConfig;
use crate::core::Result;
use crate::entity;
use crate::persist::{EntityRef, Store};

fn normalize_mark(mark: Option<String>) -> Option<String> {
    mark.map(|mark| mark.trim().to_uppercase())
        .filter(|mark| !mark.is_empty())
}

fn normalize_railroad(railroad: &mut Railroad) {
    railroad.reporting_mark = normalize_mark(railroad.reporting_mark.take());
}

fn normalize_car(car: &mut Car) {
    car.reporting_mark = normalize_mark(car.reporting_mark.take());
    if car.is_locomotive.is_none() {
        car.is_locomotive = Some(false);
    }
}

entity! {
    #[entity(doc_type = "railroad", counter_key = "railroads", prepare_save = normalize_railroad)]
    pub struct Railroad {
        /// Reporting mark, stored upper-case.
        reporting_mark: String,
        name: String,
        start_date: String,
        end_date: String,
        merged_into: String,
        merged_from: String,
        notes: String,
    }
}

entity! {
    #[entity(doc_type = "car_class", counter_key = "car_classes")]
    pub struct CarClass {
        code: String,
        car_type: String,
        wheel_arrangement: String,
        tender_axles: String,
        is_locomotive: bool,
        load_limit: String,
        capacity: String,
        weight: String,
        notes: String,
    }
}

entity! {
    #[entity(doc_type = "location", counter_key = "locations")]
    pub struct Location {
        name: String,
        location_type: String,
        parent_id: i64,
    }
}

entity! {
    #[entity(doc_type = "car", counter_key = "cars", prepare_save = normalize_car)]
    pub struct Car {
        railroad_id: i64,
        car_class_id: i64,
        location_id: i64,
        car_type: String,
        car_number: String,
        reporting_mark: String,
        brand: String,
        upc: String,
        dcc_id: String,
        traction_drivers: bool,
        capacity_override: String,
        weight_override: String,
        load_limit_override: String,
        built: String,
        alt_date: String,
        reweight_date: String,
        other_lettering: String,
        msrp: String,
        price: String,
        load: String,
        repairs_required: String,
        notes: String,
        is_locomotive: bool,
    }
}

entity! {
    #[entity(doc_type = "load", counter_key = "loads")]
    pub struct LoadType {
        name: String,
        car_class_id: i64,
        railroad_id: i64,
        brand: String,
        upc: String,
        length: f64,
        width: f64,
        height: f64,
        repairs_required: String,
        notes: String,
    }
}

entity! {
    #[entity(doc_type = "load_placement", counter_key = "load_placements")]
    pub struct LoadPlacement {
        load_id: i64,
        car_id: i64,
        location_id: i64,
        quantity: i64,
    }
}

entity! {
    #[entity(doc_type = "railroad_color_scheme", counter_key = "railroad_color_schemes")]
    pub struct RailroadColorScheme {
        railroad_id: i64,
        description: String,
        start_date: String,
        end_date: String,
    }
}

entity! {
    #[entity(doc_type = "railroad_logo", counter_key = "railroad_logos")]
    pub struct RailroadLogo {
        railroad_id: i64,
        description: String,
        start_date: String,
        end_date: String,
    }
}

entity! {
    #[entity(doc_type = "railroad_slogan", counter_key = "railroad_slogans")]
    pub struct RailroadSlogan {
        railroad_id: i64,
        slogan: String,
        start_date: String,
        end_date: String,
    }
}

impl Railroad {
    pub async fn cars(store: &Store, railroad: &EntityRef<Railroad>) -> Result<Vec<EntityRef<Car>>> {
        let Some(id) = railroad.id() else {
            return Ok(Vec::new());
        };
        store.query::<Car>().filter_by("railroad_id", id).all().await
    }
}

impl CarClass {
    pub async fn cars(store: &Store, car_class: &EntityRef<CarClass>) -> Result<Vec<EntityRef<Car>>> {
        let Some(id) = car_class.id() else {
            return Ok(Vec::new());
        };
        store.query::<Car>().filter_by("car_class_id", id).all().await
    }
}

impl Location {
    pub async fn parent(store: &Store, location: &EntityRef<Location>) -> Result<Option<EntityRef<Location>>> {
        let parent_id = location.read().parent_id();
        store.resolve(parent_id).await
    }

    pub async fn children(store: &Store, location: &EntityRef<Location>) -> Result<Vec<EntityRef<Location>>> {
        let Some(id) = location.id() else {
            return Ok(Vec::new());
        };
        store.query::<Location>().filter_by("parent_id", id).all().await
    }
}

impl Car {
    pub async fn railroad(store: &Store, car: &EntityRef<Car>) -> Result<Option<EntityRef<Railroad>>> {
        let railroad_id = car.read().railroad_id();
        store.resolve(railroad_id).await
    }

    pub async fn car_class(store: &Store, car: &EntityRef<Car>) -> Result<Option<EntityRef<CarClass>>> {
        let car_class_id = car.read().car_class_id();
        store.resolve(car_class_id).await
    }

    pub async fn location(store: &Store, car: &EntityRef<Car>) -> Result<Option<EntityRef<Location>>> {
        let location_id = car.read().location_id();
        store.resolve(location_id).await
    }
}

impl LoadPlacement {
    pub async fn load(store: &Store, placement: &EntityRef<LoadPlacement>) -> Result<Option<EntityRef<LoadType>>> {
        let load_id = placement.read().load_id();
        store.resolve(load_id).await
    }

    pub async fn car(store: &Store, placement: &EntityRef<LoadPlacement>) -> Result<Option<EntityRef<Car>>> {
        let car_id = placement.read().car_id();
        store.resolve(car_id).await
    }

    pub async fn location(store: &Store, placement: &EntityRef<LoadPlacement>) -> Result<Option<EntityRef<Location>>> {
        let location_id = placement.read().location_id();
        store.resolve(location_id).await
    }
}

macro_rules! railroad_owned {
    ($($ty:ident),+) => {
        $(
            impl $ty {
                pub async fn railroad(store: &Store, owned: &EntityRef<$ty>) -> Result<Option<EntityRef<Railroad>>> {
                    let railroad_id = owned.read().railroad_id();
                    store.resolve(railroad_id).await
                }
            }
        )+
    };
}

railroad_owned!(LoadType, RailroadColorScheme, RailroadLogo, RailroadSlogan);

/// Registers every inventory type's counter key and total.
pub fn with_inventory(config: StoreConfig) -> StoreConfig {
    config
        .register::<Railroad>()
        .register::<CarClass>()
        .register::<Location>()
        .register::<Car>()
        .register::<LoadType>()
        .register::<LoadPlacement>()
        .register::<RailroadColorScheme>()
        .register::<RailroadLogo>()
        .register::<RailroadSlogan>()
}

/// `(doc_type, counter_key)` of every inventory type, in registration order.
pub fn inventory_types() -> Vec<(&'static str, &'static str)> {
    use crate::persist::Entity;

    vec![
        (Railroad::DOC_TYPE, Railroad::COUNTER_KEY),
        (CarClass::DOC_TYPE, CarClass::COUNTER_KEY),
        (Location::DOC_TYPE, Location::COUNTER_KEY),
        (Car::DOC_TYPE, Car::COUNTER_KEY),
        (LoadType::DOC_TYPE, LoadType::COUNTER_KEY),
        (LoadPlacement::DOC_TYPE, LoadPlacement::COUNTER_KEY),
        (RailroadColorScheme::DOC_TYPE, RailroadColorScheme::COUNTER_KEY),
        (RailroadLogo::DOC_TYPE, RailroadLogo::COUNTER_KEY),
        (RailroadSlogan::DOC_TYPE, RailroadSlogan::COUNTER_KEY),
    ]
}
