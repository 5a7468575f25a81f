/// Station and city registry for the Nanjing air quality reporting service.
///
/// Defines the canonical list of national-control monitoring stations and the
/// municipal aggregates reported alongside them. This is the single source
/// of truth for location codes: every other module should reference
/// locations from here rather than hardcoding codes.
///
/// Each upstream names locations differently. The national publish service
/// uses alphanumeric station codes (`1151A`) and six-digit administrative
/// city codes (`320100`); the commercial API uses small integer station ids
/// and the same city codes. Both mappings live on the registry entries.

use crate::model::LocationId;

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// Metadata for a single monitoring station.
#[derive(Debug)]
pub struct Station {
    /// National publish-service station code; also the `LocationId` code.
    pub code: &'static str,
    /// Published station name.
    pub name: &'static str,
    pub name_en: &'static str,
    /// Administrative code of the city the station reports into.
    pub city_code: &'static str,
    /// Station id on the commercial air quality API.
    pub moji_id: u32,
}

/// A municipal aggregate.
#[derive(Debug)]
pub struct City {
    /// Six-digit administrative code; also the `LocationId` code.
    pub code: &'static str,
    pub name: &'static str,
    pub name_en: &'static str,
}

/// National-control stations in Nanjing, in report order.
pub static STATION_REGISTRY: &[Station] = &[
    Station { code: "1156A", name: "玄武湖", name_en: "Xuanwu Lake", city_code: "320100", moji_id: 362 },
    Station { code: "1155A", name: "瑞金路", name_en: "Ruijin Road", city_code: "320100", moji_id: 363 },
    Station { code: "1154A", name: "中华门", name_en: "Zhonghua Gate", city_code: "320100", moji_id: 364 },
    Station { code: "1152A", name: "草场门", name_en: "Caochang Gate", city_code: "320100", moji_id: 365 },
    Station { code: "1153A", name: "山西路", name_en: "Shanxi Road", city_code: "320100", moji_id: 366 },
    Station { code: "1159A", name: "仙林大学城", name_en: "Xianlin University Town", city_code: "320100", moji_id: 367 },
    Station { code: "1158A", name: "奥体中心", name_en: "Olympic Sports Center", city_code: "320100", moji_id: 368 },
    Station { code: "1157A", name: "浦口", name_en: "Pukou", city_code: "320100", moji_id: 369 },
    Station { code: "1151A", name: "迈皋桥", name_en: "Maigaoqiao", city_code: "320100", moji_id: 370 },
    Station { code: "3422A", name: "彩虹桥", name_en: "Caihongqiao", city_code: "320100", moji_id: 14318 },
    Station { code: "3423A", name: "雄州", name_en: "Xiongzhou", city_code: "320100", moji_id: 14319 },
    Station { code: "3424A", name: "永阳", name_en: "Yongyang", city_code: "320100", moji_id: 14320 },
    Station { code: "3425A", name: "老职中", name_en: "Laozhizhong", city_code: "320100", moji_id: 14321 },
];

/// Municipal aggregates. Only Nanjing has registered constituent stations;
/// Wuxi and Suzhou are reported from their municipal feeds alone.
pub static CITY_REGISTRY: &[City] = &[
    City { code: "320100", name: "南京", name_en: "Nanjing" },
    City { code: "320200", name: "无锡", name_en: "Wuxi" },
    City { code: "320500", name: "苏州", name_en: "Suzhou" },
];

/// Looks up a station by code. Returns `None` if not found.
pub fn find_station(code: &str) -> Option<&'static Station> {
    STATION_REGISTRY.iter().find(|s| s.code == code)
}

/// Looks up a city by administrative code. Returns `None` if not found.
pub fn find_city(code: &str) -> Option<&'static City> {
    CITY_REGISTRY.iter().find(|c| c.code == code)
}

/// Stations reporting into `city_code`, in registry order.
pub fn stations_in_city(city_code: &str) -> Vec<&'static Station> {
    STATION_REGISTRY.iter().filter(|s| s.city_code == city_code).collect()
}

/// Location ids of the stations reporting into `city_code`.
pub fn constituent_ids(city_code: &str) -> Vec<LocationId> {
    stations_in_city(city_code)
        .into_iter()
        .map(|s| LocationId::station(s.code))
        .collect()
}

pub fn station_ids() -> Vec<LocationId> {
    STATION_REGISTRY.iter().map(|s| LocationId::station(s.code)).collect()
}

pub fn city_ids() -> Vec<LocationId> {
    CITY_REGISTRY.iter().map(|c| LocationId::city(c.code)).collect()
}

/// Stations first, then cities, each in registry order.
pub fn all_locations() -> Vec<LocationId> {
    let mut ids = station_ids();
    ids.extend(city_ids());
    ids
}

/// Published name for a location, falling back to its code.
pub fn display_name(location: &LocationId) -> String {
    match location {
        LocationId::Station(code) => find_station(code).map(|s| s.name.to_string()),
        LocationId::City(code) => find_city(code).map(|c| c.name.to_string()),
    }
    .unwrap_or_else(|| location.code().to_string())
}

/// Looks up a station or city by its published name.
pub fn find_by_name(name: &str) -> Option<LocationId> {
    STATION_REGISTRY
        .iter()
        .find(|s| s.name == name || s.name_en.eq_ignore_ascii_case(name))
        .map(|s| LocationId::station(s.code))
        .or_else(|| {
            CITY_REGISTRY
                .iter()
                .find(|c| c.name == name || c.name_en.eq_ignore_ascii_case(name))
                .map(|c| LocationId::city(c.code))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
