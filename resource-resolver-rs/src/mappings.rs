// resource-resolver-rs/src/mappings.rs
// Cloud taxonomy type to Terraform resource type

use once_cell::sync::Lazy;
use std::collections::HashMap;

const AWS_PREFIX: &str = "AWS::";

/// `Service::Kind` to Terraform resource type. Extend by appending rows.
const TYPE_TABLE: &[(&str, &str)] = &[
    // Compute
    ("EC2::Instance", "aws_instance"),
    ("EC2::LaunchTemplate", "aws_launch_template"),
    ("EC2::KeyPair", "aws_key_pair"),
    ("EC2::Volume", "aws_ebs_volume"),
    ("EC2::VolumeAttachment", "aws_volume_attachment"),
    ("AutoScaling::AutoScalingGroup", "aws_autoscaling_group"),
    ("AutoScaling::LaunchConfiguration", "aws_launch_configuration"),
    ("AutoScaling::ScalingPolicy", "aws_autoscaling_policy"),
    ("Lambda::Function", "aws_lambda_function"),
    ("Lambda::Alias", "aws_lambda_alias"),
    ("Lambda::EventSourceMapping", "aws_lambda_event_source_mapping"),
    ("Lambda::LayerVersion", "aws_lambda_layer_version"),
    ("Lambda::Permission", "aws_lambda_permission"),
    ("Lambda::Url", "aws_lambda_function_url"),
    ("Serverless::Function", "aws_lambda_function"),
    ("ECS::Cluster", "aws_ecs_cluster"),
    ("ECS::Service", "aws_ecs_service"),
    ("ECS::TaskDefinition", "aws_ecs_task_definition"),
    ("ECS::CapacityProvider", "aws_ecs_capacity_provider"),
    ("EKS::Cluster", "aws_eks_cluster"),
    ("EKS::Nodegroup", "aws_eks_node_group"),
    ("EKS::FargateProfile", "aws_eks_fargate_profile"),
    ("EKS::Addon", "aws_eks_addon"),
    ("Batch::ComputeEnvironment", "aws_batch_compute_environment"),
    ("Batch::JobQueue", "aws_batch_job_queue"),
    ("Batch::JobDefinition", "aws_batch_job_definition"),
    // Storage
    ("S3::Bucket", "aws_s3_bucket"),
    ("S3::BucketPolicy", "aws_s3_bucket_policy"),
    ("S3::AccessPoint", "aws_s3_access_point"),
    ("EFS::FileSystem", "aws_efs_file_system"),
    ("EFS::MountTarget", "aws_efs_mount_target"),
    ("EFS::AccessPoint", "aws_efs_access_point"),
    ("FSx::FileSystem", "aws_fsx_lustre_file_system"),
    ("Backup::BackupPlan", "aws_backup_plan"),
    ("Backup::BackupVault", "aws_backup_vault"),
    ("Backup::BackupSelection", "aws_backup_selection"),
    // Databases
    ("RDS::DBInstance", "aws_db_instance"),
    ("RDS::DBCluster", "aws_rds_cluster"),
    ("RDS::DBSubnetGroup", "aws_db_subnet_group"),
    ("RDS::DBParameterGroup", "aws_db_parameter_group"),
    ("RDS::DBClusterParameterGroup", "aws_rds_cluster_parameter_group"),
    ("RDS::OptionGroup", "aws_db_option_group"),
    ("RDS::DBProxy", "aws_db_proxy"),
    ("RDS::GlobalCluster", "aws_rds_global_cluster"),
    ("DynamoDB::Table", "aws_dynamodb_table"),
    ("DynamoDB::GlobalTable", "aws_dynamodb_global_table"),
    ("ElastiCache::CacheCluster", "aws_elasticache_cluster"),
    ("ElastiCache::ReplicationGroup", "aws_elasticache_replication_group"),
    ("ElastiCache::SubnetGroup", "aws_elasticache_subnet_group"),
    ("Redshift::Cluster", "aws_redshift_cluster"),
    ("Redshift::ClusterSubnetGroup", "aws_redshift_subnet_group"),
    ("Redshift::ClusterParameterGroup", "aws_redshift_parameter_group"),
    ("DocDB::DBCluster", "aws_docdb_cluster"),
    ("DocDB::DBInstance", "aws_docdb_cluster_instance"),
    ("Neptune::DBCluster", "aws_neptune_cluster"),
    ("Neptune::DBInstance", "aws_neptune_cluster_instance"),
    ("MemoryDB::Cluster", "aws_memorydb_cluster"),
    // Networking
    ("EC2::VPC", "aws_vpc"),
    ("EC2::Subnet", "aws_subnet"),
    ("EC2::RouteTable", "aws_route_table"),
    ("EC2::Route", "aws_route"),
    ("EC2::InternetGateway", "aws_internet_gateway"),
    ("EC2::NatGateway", "aws_nat_gateway"),
    ("EC2::EIP", "aws_eip"),
    ("EC2::SecurityGroup", "aws_security_group"),
    ("EC2::SecurityGroupIngress", "aws_security_group_rule"),
    ("EC2::SecurityGroupEgress", "aws_security_group_rule"),
    ("EC2::NetworkAcl", "aws_network_acl"),
    ("EC2::NetworkAclEntry", "aws_network_acl_rule"),
    ("EC2::VPCEndpoint", "aws_vpc_endpoint"),
    ("EC2::VPNGateway", "aws_vpn_gateway"),
    ("EC2::TransitGateway", "aws_ec2_transit_gateway"),
    ("EC2::VPCPeeringConnection", "aws_vpc_peering_connection"),
    ("EC2::NetworkInterface", "aws_network_interface"),
    ("EC2::FlowLog", "aws_flow_log"),
    ("ElasticLoadBalancing::LoadBalancer", "aws_elb"),
    ("ElasticLoadBalancingV2::LoadBalancer", "aws_lb"),
    ("ElasticLoadBalancingV2::TargetGroup", "aws_lb_target_group"),
    ("ElasticLoadBalancingV2::Listener", "aws_lb_listener"),
    ("ElasticLoadBalancingV2::ListenerRule", "aws_lb_listener_rule"),
    ("CloudFront::Distribution", "aws_cloudfront_distribution"),
    ("CloudFront::OriginAccessControl", "aws_cloudfront_origin_access_control"),
    ("Route53::HostedZone", "aws_route53_zone"),
    ("Route53::RecordSet", "aws_route53_record"),
    ("Route53::HealthCheck", "aws_route53_health_check"),
    ("ApiGateway::RestApi", "aws_api_gateway_rest_api"),
    ("ApiGateway::Stage", "aws_api_gateway_stage"),
    ("ApiGateway::DomainName", "aws_api_gateway_domain_name"),
    ("ApiGatewayV2::Api", "aws_apigatewayv2_api"),
    ("ApiGatewayV2::Stage", "aws_apigatewayv2_stage"),
    // Identity and security
    ("IAM::Role", "aws_iam_role"),
    ("IAM::Policy", "aws_iam_policy"),
    ("IAM::ManagedPolicy", "aws_iam_policy"),
    ("IAM::User", "aws_iam_user"),
    ("IAM::Group", "aws_iam_group"),
    ("IAM::InstanceProfile", "aws_iam_instance_profile"),
    ("IAM::AccessKey", "aws_iam_access_key"),
    ("IAM::OIDCProvider", "aws_iam_openid_connect_provider"),
    ("IAM::SAMLProvider", "aws_iam_saml_provider"),
    ("KMS::Key", "aws_kms_key"),
    ("KMS::Alias", "aws_kms_alias"),
    ("SecretsManager::Secret", "aws_secretsmanager_secret"),
    ("SecretsManager::RotationSchedule", "aws_secretsmanager_secret_rotation"),
    ("SSM::Parameter", "aws_ssm_parameter"),
    ("SSM::Document", "aws_ssm_document"),
    ("CertificateManager::Certificate", "aws_acm_certificate"),
    ("ACM::Certificate", "aws_acm_certificate"),
    ("WAFv2::WebACL", "aws_wafv2_web_acl"),
    ("WAFv2::WebACLAssociation", "aws_wafv2_web_acl_association"),
    ("WAFv2::IPSet", "aws_wafv2_ip_set"),
    ("GuardDuty::Detector", "aws_guardduty_detector"),
    ("SecurityHub::Hub", "aws_securityhub_account"),
    ("Config::ConfigRule", "aws_config_config_rule"),
    ("Config::ConfigurationRecorder", "aws_config_configuration_recorder"),
    ("Config::DeliveryChannel", "aws_config_delivery_channel"),
    ("CloudTrail::Trail", "aws_cloudtrail"),
    ("Cognito::UserPool", "aws_cognito_user_pool"),
    ("Cognito::UserPoolClient", "aws_cognito_user_pool_client"),
    ("Cognito::IdentityPool", "aws_cognito_identity_pool"),
    // Monitoring
    ("CloudWatch::Alarm", "aws_cloudwatch_metric_alarm"),
    ("CloudWatch::Dashboard", "aws_cloudwatch_dashboard"),
    ("Logs::LogGroup", "aws_cloudwatch_log_group"),
    ("Logs::MetricFilter", "aws_cloudwatch_log_metric_filter"),
    ("Logs::SubscriptionFilter", "aws_cloudwatch_log_subscription_filter"),
    ("Events::Rule", "aws_cloudwatch_event_rule"),
    ("Events::EventBus", "aws_cloudwatch_event_bus"),
    // Messaging and analytics
    ("SNS::Topic", "aws_sns_topic"),
    ("SNS::TopicPolicy", "aws_sns_topic_policy"),
    ("SNS::Subscription", "aws_sns_topic_subscription"),
    ("SQS::Queue", "aws_sqs_queue"),
    ("SQS::QueuePolicy", "aws_sqs_queue_policy"),
    ("Kinesis::Stream", "aws_kinesis_stream"),
    ("KinesisFirehose::DeliveryStream", "aws_kinesis_firehose_delivery_stream"),
    ("MSK::Cluster", "aws_msk_cluster"),
    ("StepFunctions::StateMachine", "aws_sfn_state_machine"),
    ("Athena::WorkGroup", "aws_athena_workgroup"),
    ("Glue::Database", "aws_glue_catalog_database"),
    ("Glue::Job", "aws_glue_job"),
    ("Glue::Crawler", "aws_glue_crawler"),
    ("EMR::Cluster", "aws_emr_cluster"),
    ("ECR::Repository", "aws_ecr_repository"),
    ("CodeBuild::Project", "aws_codebuild_project"),
    ("CodePipeline::Pipeline", "aws_codepipeline"),
    ("SageMaker::NotebookInstance", "aws_sagemaker_notebook_instance"),
    ("SageMaker::Endpoint", "aws_sagemaker_endpoint"),
    ("OpenSearchService::Domain", "aws_opensearch_domain"),
    ("Elasticsearch::Domain", "aws_elasticsearch_domain"),
];

/// Attributes that carry the cloud-side name, beyond `name` and `bucket`.
const NAME_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("aws_lambda_function", &["function_name"]),
    ("aws_lambda_alias", &["function_name"]),
    ("aws_db_instance", &["identifier"]),
    ("aws_rds_cluster", &["cluster_identifier"]),
    ("aws_docdb_cluster", &["cluster_identifier"]),
    ("aws_docdb_cluster_instance", &["identifier"]),
    ("aws_neptune_cluster", &["cluster_identifier"]),
    ("aws_neptune_cluster_instance", &["identifier"]),
    ("aws_redshift_cluster", &["cluster_identifier"]),
    ("aws_elasticache_cluster", &["cluster_id"]),
    ("aws_elasticache_replication_group", &["replication_group_id"]),
    ("aws_opensearch_domain", &["domain_name"]),
    ("aws_elasticsearch_domain", &["domain_name"]),
    ("aws_s3_bucket_policy", &["bucket"]),
    ("aws_kms_alias", &["name"]),
];

const COMMON_NAME_ATTRIBUTES: &[&str] = &["name", "bucket"];

static BY_TYPE: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| TYPE_TABLE.iter().copied().collect());

fn normalize(resource_type: &str) -> &str {
    let trimmed = resource_type.trim();
    trimmed.strip_prefix(AWS_PREFIX).unwrap_or(trimmed)
}

/// Terraform type for a `Service::Kind` type, with or without the `AWS::`
/// prefix. A Terraform type from the table maps to itself.
pub fn terraform_type_for(resource_type: &str) -> Option<&'static str> {
    let key = normalize(resource_type);
    if let Some(tf_type) = BY_TYPE.get(key) {
        return Some(*tf_type);
    }
    TYPE_TABLE
        .iter()
        .map(|(_, tf)| *tf)
        .find(|tf| *tf == key)
}

pub fn is_supported_type(resource_type: &str) -> bool {
    terraform_type_for(resource_type).is_some()
}

/// Every supported type in `AWS::Service::Kind` form, sorted.
pub fn supported_types() -> Vec<String> {
    let mut types: Vec<String> = TYPE_TABLE
        .iter()
        .map(|(aws, _)| format!("{}{}", AWS_PREFIX, aws))
        .collect();
    types.sort();
    types
}

/// Supported types of one service (`"S3"` or `"AWS::S3"`), sorted.
pub fn types_for_service(service: &str) -> Vec<String> {
    let service = normalize(service).trim_end_matches("::");
    let mut types: Vec<String> = TYPE_TABLE
        .iter()
        .filter(|(aws, _)| {
            aws.split_once("::")
                .map(|(svc, _)| svc.eq_ignore_ascii_case(service))
                .unwrap_or(false)
        })
        .map(|(aws, _)| format!("{}{}", AWS_PREFIX, aws))
        .collect();
    types.sort();
    types
}

/// Attributes to compare against the name extracted from an ARN, in
/// priority order.
pub fn name_attributes(terraform_type: &str) -> Vec<&'static str> {
    let mut attrs: Vec<&'static str> = NAME_ATTRIBUTES
        .iter()
        .find(|(tf, _)| *tf == terraform_type)
        .map(|(_, attrs)| attrs.to_vec())
        .unwrap_or_default();
    for common in COMMON_NAME_ATTRIBUTES {
        if !attrs.contains(common) {
            attrs.push(*common);
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_optional() {
        assert_eq!(terraform_type_for("AWS::S3::Bucket"), Some("aws_s3_bucket"));
        assert_eq!(terraform_type_for("S3::Bucket"), Some("aws_s3_bucket"));
        assert_eq!(terraform_type_for("  AWS::IAM::Role "), Some("aws_iam_role"));
        assert_eq!(terraform_type_for("aws_sqs_queue"), Some("aws_sqs_queue"));
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(terraform_type_for("AWS::Made::Up"), None);
        assert!(!is_supported_type("Made::Up"));
        assert!(is_supported_type("Lambda::Function"));
    }

    #[test]
    fn test_listing() {
        let all = supported_types();
        assert!(all.contains(&"AWS::S3::Bucket".to_string()));
        assert!(all.windows(2).all(|w| w[0] <= w[1]));

        let s3 = types_for_service("s3");
        assert_eq!(
            s3,
            vec!["AWS::S3::AccessPoint", "AWS::S3::Bucket", "AWS::S3::BucketPolicy"]
        );
        assert_eq!(types_for_service("AWS::S3"), s3);
    }

    #[test]
    fn test_name_attributes() {
        assert_eq!(
            name_attributes("aws_lambda_function"),
            vec!["function_name", "name", "bucket"]
        );
        assert_eq!(name_attributes("aws_s3_bucket"), vec!["name", "bucket"]);
        assert_eq!(name_attributes("aws_s3_bucket_policy"), vec!["bucket", "name"]);
    }

    #[test]
    fn test_table_has_no_duplicate_keys() {
        assert_eq!(BY_TYPE.len(), TYPE_TABLE.len());
    }
}
