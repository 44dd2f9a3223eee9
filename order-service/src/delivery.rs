use bigdecimal::BigDecimal;
use num_traits::Zero;
use shared::round_money;

use crate::error::EngineError;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryQuote {
    pub fee: BigDecimal,
    pub distance_km: BigDecimal,
}

/// Distance-based delivery pricing for a single city zone.
#[derive(Debug, Clone)]
pub struct ZoneFeeSchedule {
    pub base_fee: BigDecimal,
    pub per_km_fee: BigDecimal,
    /// Subtotal at or above which delivery is free.
    pub free_delivery_threshold: Option<BigDecimal>,
    pub max_radius_km: f64,
}

impl Default for ZoneFeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: BigDecimal::from(20),
            per_km_fee: BigDecimal::from(5),
            free_delivery_threshold: None,
            max_radius_km: 15.0,
        }
    }
}

impl ZoneFeeSchedule {
    /// Fee for carrying an order of `subtotal` from the vendor to the buyer.
    /// Distance is charged per started kilometre.
    pub fn quote(
        &self,
        vendor: (f64, f64),
        destination: (f64, f64),
        subtotal: &BigDecimal,
    ) -> Result<DeliveryQuote, EngineError> {
        let km = haversine_km(vendor, destination);
        if km > self.max_radius_km {
            return Err(EngineError::Validation(format!(
                "delivery address is {km:.1} km away, outside the {:.1} km zone",
                self.max_radius_km
            )));
        }

        let distance_km = BigDecimal::from((km * 1000.0).round() as i64) / BigDecimal::from(1000);
        let free = self
            .free_delivery_threshold
            .as_ref()
            .is_some_and(|threshold| subtotal >= threshold);

        let fee = if free {
            BigDecimal::zero()
        } else {
            let started_km = BigDecimal::from(km.ceil() as i64);
            round_money(&(&self.base_fee + &self.per_km_fee * started_km))
        };

        Ok(DeliveryQuote { fee, distance_km })
    }
}

fn haversine_km((lat1, lon1): (f64, f64), (lat2, lon2): (f64, f64)) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: (f64, f64) = (18.5204, 73.8567);

    #[test]
    fn test_same_point_costs_base_fee() {
        let quote = ZoneFeeSchedule::default()
            .quote(SHOP, SHOP, &BigDecimal::from(100))
            .unwrap();
        assert_eq!(quote.fee, BigDecimal::from(20));
        assert_eq!(quote.distance_km, BigDecimal::zero());
    }

    #[test]
    fn test_started_kilometres_are_charged() {
        // Roughly 2.2 km north of the shop.
        let destination = (18.5404, 73.8567);
        let quote = ZoneFeeSchedule::default()
            .quote(SHOP, destination, &BigDecimal::from(100))
            .unwrap();
        assert_eq!(quote.fee, BigDecimal::from(35));
        assert!(quote.distance_km > BigDecimal::from(2));
    }

    #[test]
    fn test_free_above_threshold() {
        let schedule = ZoneFeeSchedule {
            free_delivery_threshold: Some(BigDecimal::from(499)),
            ..ZoneFeeSchedule::default()
        };
        let quote = schedule.quote(SHOP, SHOP, &BigDecimal::from(500)).unwrap();
        assert_eq!(quote.fee, BigDecimal::zero());
    }

    #[test]
    fn test_outside_zone_rejected() {
        let far = (19.0760, 72.8777);
        let err = ZoneFeeSchedule::default()
            .quote(SHOP, far, &BigDecimal::from(100))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
