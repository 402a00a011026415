pub mod push_notification;
pub mod push_subscription;
pub mod wallet_member;

pub use push_notification::{NotificationFilters, PushNotificationRepository};
pub use push_subscription::PushSubscriptionRepository;
pub use wallet_member::WalletMemberRepository;
