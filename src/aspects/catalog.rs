//! Curated fallback data for when live inventory says too little.
//!
//! Closed and versioned: bump `CATALOG_VERSION` whenever entries change.

use crate::models::{AttributeValue, normalize_part};

pub const CATALOG_VERSION: &str = "2024.2";

/// Oldest year offered when years have to be synthesized.
pub const DEFAULT_YEAR_FLOOR: i32 = 1990;

/// Count assigned to curated values; live counts always replace it.
pub const FALLBACK_COUNT: u32 = 1;

struct CatalogMake {
    name: &'static str,
    models: &'static [&'static str],
}

const CATALOG: &[CatalogMake] = &[
    CatalogMake { name: "Acura", models: &["ILX", "Integra", "MDX", "RDX", "TLX"] },
    CatalogMake { name: "Audi", models: &["A3", "A4", "A6", "Q3", "Q5", "Q7", "R8", "TT"] },
    CatalogMake { name: "BMW", models: &["3 Series", "5 Series", "7 Series", "M3", "X3", "X5", "Z4"] },
    CatalogMake { name: "Buick", models: &["Enclave", "Encore", "LeSabre", "Regal"] },
    CatalogMake { name: "Cadillac", models: &["CTS", "DeVille", "Escalade", "XT5"] },
    CatalogMake {
        name: "Chevrolet",
        models: &["Bel Air", "Camaro", "Corvette", "Equinox", "Impala", "Malibu", "Silverado 1500", "Tahoe"],
    },
    CatalogMake { name: "Chrysler", models: &["300", "Pacifica", "Town & Country"] },
    CatalogMake { name: "Dodge", models: &["Challenger", "Charger", "Durango", "Grand Caravan", "Viper"] },
    CatalogMake {
        name: "Ford",
        models: &["Bronco", "Escape", "Explorer", "F-150", "F-250", "Focus", "Fusion", "Mustang", "Ranger", "Thunderbird"],
    },
    CatalogMake { name: "GMC", models: &["Acadia", "Sierra 1500", "Terrain", "Yukon"] },
    CatalogMake { name: "Honda", models: &["Accord", "Civic", "CR-V", "Odyssey", "Pilot", "S2000"] },
    CatalogMake { name: "Hyundai", models: &["Elantra", "Santa Fe", "Sonata", "Tucson"] },
    CatalogMake { name: "Infiniti", models: &["G35", "Q50", "QX60"] },
    CatalogMake { name: "Jaguar", models: &["E-Type", "F-Type", "XJ", "XK"] },
    CatalogMake { name: "Jeep", models: &["Cherokee", "Grand Cherokee", "Wrangler", "Gladiator"] },
    CatalogMake { name: "Kia", models: &["Forte", "Optima", "Sorento", "Soul", "Telluride"] },
    CatalogMake { name: "Land Rover", models: &["Defender", "Discovery", "Range Rover", "Range Rover Sport"] },
    CatalogMake { name: "Lexus", models: &["ES", "GX", "IS", "LS", "RX"] },
    CatalogMake { name: "Lincoln", models: &["Continental", "MKZ", "Navigator", "Town Car"] },
    CatalogMake { name: "Mazda", models: &["CX-5", "Mazda3", "Mazda6", "MX-5 Miata", "RX-7"] },
    CatalogMake {
        name: "Mercedes-Benz",
        models: &["C-Class", "E-Class", "G-Class", "GLE", "S-Class", "SL-Class"],
    },
    CatalogMake { name: "Mini", models: &["Cooper", "Countryman"] },
    CatalogMake { name: "Mitsubishi", models: &["Eclipse", "Lancer", "Outlander"] },
    CatalogMake { name: "Nissan", models: &["350Z", "Altima", "Frontier", "Maxima", "Rogue", "Sentra"] },
    CatalogMake { name: "Pontiac", models: &["Firebird", "GTO", "Grand Prix", "Trans Am"] },
    CatalogMake { name: "Porsche", models: &["911", "Boxster", "Cayenne", "Cayman", "Macan"] },
    CatalogMake { name: "Ram", models: &["1500", "2500", "ProMaster"] },
    CatalogMake { name: "Subaru", models: &["Forester", "Impreza", "Legacy", "Outback", "WRX"] },
    CatalogMake { name: "Tesla", models: &["Model 3", "Model S", "Model X", "Model Y"] },
    CatalogMake {
        name: "Toyota",
        models: &["4Runner", "Camry", "Corolla", "Highlander", "Land Cruiser", "Prius", "RAV4", "Supra", "Tacoma", "Tundra"],
    },
    CatalogMake { name: "Volkswagen", models: &["Beetle", "Golf", "GTI", "Jetta", "Passat", "Tiguan"] },
    CatalogMake { name: "Volvo", models: &["240", "S60", "XC60", "XC90"] },
];

/// Common shorthand seen in listing titles.
const MAKE_ALIASES: &[(&str, &str)] = &[
    ("chevy", "Chevrolet"),
    ("vw", "Volkswagen"),
    ("mercedes", "Mercedes-Benz"),
    ("benz", "Mercedes-Benz"),
    ("landrover", "Land Rover"),
];

fn find(make: &str) -> Option<&'static CatalogMake> {
    let wanted = normalize_part(make);
    let wanted = MAKE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == wanted)
        .map(|(_, name)| normalize_part(name))
        .unwrap_or(wanted);
    CATALOG.iter().find(|entry| normalize_part(entry.name) == wanted)
}

/// Catalog spelling of a make, resolving aliases.
pub fn canonical_make(make: &str) -> Option<&'static str> {
    find(make).map(|entry| entry.name)
}

pub fn known_makes() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|entry| entry.name)
}

pub fn make_aliases() -> &'static [(&'static str, &'static str)] {
    MAKE_ALIASES
}

pub fn known_models(make: &str) -> &'static [&'static str] {
    find(make).map(|entry| entry.models).unwrap_or(&[])
}

pub fn fallback_makes() -> Vec<AttributeValue> {
    known_makes()
        .map(|name| AttributeValue::new(name, FALLBACK_COUNT, None))
        .collect()
}

/// Curated models for `make`; empty when the make is not covered.
pub fn fallback_models(make: &str) -> Vec<AttributeValue> {
    let Some(entry) = find(make) else {
        return Vec::new();
    };
    entry
        .models
        .iter()
        .map(|model| AttributeValue::new(*model, FALLBACK_COUNT, Some(entry.name)))
        .collect()
}

/// Every year between the bounds, newest first. Bounds may be given in
/// either order.
pub fn fallback_years(from_year: i32, to_year: i32) -> Vec<AttributeValue> {
    let (low, high) = if from_year <= to_year {
        (from_year, to_year)
    } else {
        (to_year, from_year)
    };
    (low..=high)
        .rev()
        .map(|year| AttributeValue::new(year.to_string(), FALLBACK_COUNT, None))
        .collect()
}
