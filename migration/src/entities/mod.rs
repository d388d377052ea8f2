pub mod pixel_config;
pub mod routing_rule;
pub mod scan_event;
pub mod short_link;

pub use pixel_config::Entity as PixelConfigEntity;
pub use routing_rule::Entity as RoutingRuleEntity;
pub use scan_event::Entity as ScanEventEntity;
pub use short_link::Entity as ShortLinkEntity;
